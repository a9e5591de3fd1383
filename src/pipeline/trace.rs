use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use sha2::{Digest, Sha256};

/// Collects every outgoing prompt into one markdown file for manual inspection.
pub struct PromptTrace {
    path: PathBuf,
    enabled: bool,
    buf: String,
    batches: usize,
}

impl PromptTrace {
    pub fn new(path: PathBuf, enabled: bool) -> Self {
        Self {
            path,
            enabled,
            buf: String::new(),
            batches: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// `first`/`last` are 1-based entry numbers of the batch.
    pub fn record_batch(
        &mut self,
        first: usize,
        last: usize,
        model_count: usize,
        forced_count: usize,
        prompt: &str,
    ) {
        if !self.enabled {
            return;
        }
        self.batches += 1;
        let _ = writeln!(self.buf, "## Batch {} (entries {first}-{last})\n", self.batches);
        let _ = writeln!(
            self.buf,
            "- model entries: {model_count}\n- forced entries: {forced_count}\n- sha256: `{}`\n",
            fingerprint(prompt)
        );
        push_fenced(&mut self.buf, prompt);
    }

    pub fn record_retry(&mut self, entry_id: &str, prompt: &str) {
        if !self.enabled {
            return;
        }
        let _ = writeln!(self.buf, "### Retry for entry {entry_id}\n");
        let _ = writeln!(self.buf, "- sha256: `{}`\n", fingerprint(prompt));
        push_fenced(&mut self.buf, prompt);
    }

    /// One prompt over every source text, unprotected, for translating by hand.
    pub fn record_manual(&mut self, prompt: &str) {
        if !self.enabled {
            return;
        }
        let _ = writeln!(self.buf, "## Manual translation prompt\n");
        push_fenced(&mut self.buf, prompt);
    }

    /// Writes the file; `None` when capture is off.
    pub fn finish(self, title: &str) -> anyhow::Result<Option<PathBuf>> {
        if !self.enabled {
            return Ok(None);
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create debug dir: {}", parent.display()))?;
        }
        let body = format!("# Prompt debug: {title}\n\n{}", self.buf);
        std::fs::write(&self.path, body)
            .with_context(|| format!("write prompt debug: {}", self.path.display()))?;
        Ok(Some(self.path))
    }
}

fn push_fenced(buf: &mut String, text: &str) {
    // Longer fence than any backtick run in the prompt itself.
    let longest = text
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    let _ = writeln!(buf, "{fence}text\n{}\n{fence}\n", text.trim_end());
}

pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(digest)
}
