//! Helvetica metrics for measuring, wrapping and justifying text.
//!
//! Widths are the standard Type 1 AFM advance widths (1/1000 em) for printable ASCII.

const POINT_TO_MM: f32 = 0.352_778;

#[rustfmt::skip]
const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556,
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556,
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556,
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584,
];

#[rustfmt::skip]
const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611,
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778,
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556,
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611,
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Face {
    Regular,
    Bold,
}

/// Maps accented Latin-1 letters to their base letter, which has the same advance width.
fn base_letter(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
        'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'É' | 'È' | 'Ê' | 'Ë' => 'E',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
        'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
        'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
        'ç' => 'c',
        'Ç' => 'C',
        'ñ' => 'n',
        'Ñ' => 'N',
        'º' | 'ª' => 'o',
        other => other,
    }
}

fn char_width(face: Face, c: char) -> u16 {
    let table = match face {
        Face::Regular => &HELVETICA,
        Face::Bold => &HELVETICA_BOLD,
    };
    let c = base_letter(c);
    match c as u32 {
        code @ 32..=126 => table[(code - 32) as usize],
        _ => 556,
    }
}

/// Width of `text` in millimetres at `size` points.
pub(crate) fn text_width(text: &str, face: Face, size: f32) -> f32 {
    let units: u32 = text.chars().map(|c| u32::from(char_width(face, c))).sum();
    units as f32 / 1000.0 * size * POINT_TO_MM
}

/// Line advance in millimetres for `size` point text.
pub(crate) fn line_height(size: f32) -> f32 {
    size * 1.45 * POINT_TO_MM
}

/// Breaks `text` into lines no wider than `max_width` millimetres.
///
/// Words wider than a whole line are split by characters.
pub(crate) fn wrap(text: &str, face: Face, size: f32, max_width: f32) -> Vec<String> {
    let space = text_width(" ", face, size);
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_width = 0.0;

    for word in text.split_whitespace() {
        for piece in split_long_word(word, face, size, max_width) {
            let width = text_width(&piece, face, size);
            if !current.is_empty() && current_width + space + width > max_width {
                lines.push(std::mem::take(&mut current));
                current_width = 0.0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_width += space;
            }
            current.push_str(&piece);
            current_width += width;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn split_long_word(word: &str, face: Face, size: f32, max_width: f32) -> Vec<String> {
    if text_width(word, face, size) <= max_width {
        return vec![word.to_owned()];
    }
    let mut pieces = Vec::new();
    let mut piece = String::new();
    for c in word.chars() {
        piece.push(c);
        if text_width(&piece, face, size) > max_width && piece.chars().count() > 1 {
            piece.pop();
            pieces.push(std::mem::take(&mut piece));
            piece.push(c);
        }
    }
    if !piece.is_empty() {
        pieces.push(piece);
    }
    pieces
}

/// X offsets (relative to the line start) for each word of a justified line.
///
/// Returns `None` for lines that should stay left aligned: single words, or lines whose
/// natural width already fills `max_width`.
pub(crate) fn justify(
    line: &str,
    face: Face,
    size: f32,
    max_width: f32,
) -> Option<Vec<(f32, &str)>> {
    let words: Vec<&str> = line.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() < 2 {
        return None;
    }
    let words_width: f32 = words.iter().map(|w| text_width(w, face, size)).sum();
    let gap = (max_width - words_width) / (words.len() - 1) as f32;
    if gap <= 0.0 {
        return None;
    }

    let mut x = 0.0;
    let mut placed = Vec::with_capacity(words.len());
    for word in words {
        placed.push((x, word));
        x += text_width(word, face, size) + gap;
    }
    Some(placed)
}

/// Shortens `text` with an ellipsis so it fits `max_width`.
pub(crate) fn fit(text: &str, face: Face, size: f32, max_width: f32) -> String {
    if text_width(text, face, size) <= max_width {
        return text.to_owned();
    }
    let mut out: String = text.to_owned();
    while !out.is_empty() && text_width(&format!("{out}..."), face, size) > max_width {
        out.pop();
    }
    format!("{}...", out.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bold_is_wider_than_regular() {
        let text = "Laudo de eletrocardiograma";
        assert!(text_width(text, Face::Bold, 10.0) > text_width(text, Face::Regular, 10.0));
    }

    #[test]
    fn accented_letters_measure_like_base_letters() {
        assert_eq!(
            text_width("ação", Face::Regular, 10.0),
            text_width("acao", Face::Regular, 10.0)
        );
    }

    #[test]
    fn wrap_respects_width() {
        let text = "Ritmo sinusal regular com frequência cardíaca dentro dos limites da normalidade para a idade do paciente.";
        let lines = wrap(text, Face::Regular, 10.0, 60.0);

        assert!(lines.len() > 1);
        for line in &lines {
            assert!(text_width(line, Face::Regular, 10.0) <= 60.0);
        }
        assert_eq!(lines.join(" "), text);
    }

    #[test]
    fn wrap_splits_unbreakable_words() {
        let word = "x".repeat(200);
        let lines = wrap(&word, Face::Regular, 10.0, 40.0);
        assert!(lines.len() > 1);
        assert_eq!(lines.concat(), word);
    }

    #[test]
    fn justified_line_ends_at_max_width() {
        let placed = justify("um dois tres", Face::Regular, 10.0, 80.0).unwrap();
        let (last_x, last_word) = placed[2];
        let end = last_x + text_width(last_word, Face::Regular, 10.0);
        assert!((end - 80.0).abs() < 0.01);
        assert_eq!(placed[0].0, 0.0);
    }

    #[test]
    fn single_word_is_not_justified() {
        assert!(justify("palavra", Face::Regular, 10.0, 80.0).is_none());
    }

    #[test]
    fn fit_adds_ellipsis() {
        let long = "Maria da Conceição Aparecida dos Santos Oliveira";
        let fitted = fit(long, Face::Regular, 10.0, 30.0);
        assert!(fitted.ends_with("..."));
        assert!(text_width(&fitted, Face::Regular, 10.0) <= 30.0);
    }
}
