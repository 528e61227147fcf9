/// Accumulates raw output chunks and releases complete lines.
///
/// Works on bytes so a multi-byte character split across two reads is only
/// decoded once both halves have arrived.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Feed a chunk; returns everything up to the last newline seen so far,
    /// without that newline.
    pub fn push(&mut self, chunk: &[u8]) -> Option<String> {
        self.pending.extend_from_slice(chunk);
        let newline = self.pending.iter().rposition(|&b| b == b'\n')?;
        let rest = self.pending.split_off(newline + 1);
        let mut complete = std::mem::replace(&mut self.pending, rest);
        complete.truncate(newline);
        Some(String::from_utf8_lossy(&complete).into_owned())
    }

    /// Take the unterminated remainder, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}
