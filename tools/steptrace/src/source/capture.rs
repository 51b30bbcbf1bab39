/// Console output of one traced run: a growing buffer plus the watermark up to
/// which output has already been credited to a step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputCapture {
    buffer: String,
    watermark: usize,
}

impl OutputCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, chunk: &str) {
        self.buffer.push_str(chunk);
    }

    /// Everything written since the previous call; advances the watermark.
    pub fn take_since_watermark(&mut self) -> String {
        let fresh = self.buffer[self.watermark..].to_string();
        self.watermark = self.buffer.len();
        fresh
    }

    pub fn contents(&self) -> &str {
        &self.buffer
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }
}
