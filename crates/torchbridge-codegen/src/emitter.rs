//! Indentation-aware text sink for generated C++.

const INDENT: &str = "    ";

#[derive(Debug, Default)]
pub struct CodeEmitter {
    buf: String,
    depth: usize,
}

impl CodeEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write one line at the current indentation. Empty lines carry no indent.
    pub fn line(&mut self, text: impl AsRef<str>) {
        let text = text.as_ref();
        if !text.is_empty() {
            for _ in 0..self.depth {
                self.buf.push_str(INDENT);
            }
            self.buf.push_str(text);
        }
        self.buf.push('\n');
    }

    pub fn blank(&mut self) {
        self.buf.push('\n');
    }

    pub fn indent(&mut self) {
        self.depth += 1;
    }

    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn finish(self) -> String {
        self.buf
    }
}
