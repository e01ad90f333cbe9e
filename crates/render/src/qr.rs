use qrcode::{Color, QrCode};

/// Module matrix of an encoded QR code, row-major, `true` for dark modules.
pub(crate) struct QrMatrix {
    pub width: usize,
    pub dark: Vec<bool>,
}

impl QrMatrix {
    /// Horizontal runs of dark modules as `(row, first_column, length)`.
    pub fn dark_runs(&self) -> Vec<(usize, usize, usize)> {
        let mut runs = Vec::new();
        for row in 0..self.width {
            let mut col = 0;
            while col < self.width {
                if self.dark[row * self.width + col] {
                    let start = col;
                    while col < self.width && self.dark[row * self.width + col] {
                        col += 1;
                    }
                    runs.push((row, start, col - start));
                } else {
                    col += 1;
                }
            }
        }
        runs
    }
}

/// Encodes `url`, or returns `None` (logged) when it cannot be represented.
pub(crate) fn encode(url: &str) -> Option<QrMatrix> {
    match QrCode::new(url.as_bytes()) {
        Ok(code) => Some(QrMatrix {
            width: code.width(),
            dark: code
                .to_colors()
                .into_iter()
                .map(|c| c == Color::Dark)
                .collect(),
        }),
        Err(e) => {
            tracing::warn!(error = %e, "QR encoding failed, falling back to link text");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_public_link() {
        let matrix = encode("https://laudos.example.com/publico/laudos/abc").unwrap();
        assert_eq!(matrix.dark.len(), matrix.width * matrix.width);
        assert!(!matrix.dark_runs().is_empty());
    }

    #[test]
    fn oversized_payload_returns_none() {
        let url = format!("https://example.com/{}", "a".repeat(8000));
        assert!(encode(&url).is_none());
    }

    #[test]
    fn runs_cover_every_dark_module() {
        let matrix = encode("laudo").unwrap();
        let covered: usize = matrix.dark_runs().iter().map(|(_, _, len)| len).sum();
        assert_eq!(covered, matrix.dark.iter().filter(|d| **d).count());
    }
}
