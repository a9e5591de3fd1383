use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use encoding_rs::GBK;
use tracing::{debug, warn};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const FALLBACK_LIMIT: usize = 50;

/// Decodes delimited-text bytes: BOM or valid UTF-8 as-is, GBK otherwise.
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some(rest) = bytes.strip_prefix(UTF8_BOM) {
        return String::from_utf8_lossy(rest).into_owned();
    }
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (text, _, had_errors) = GBK.decode(bytes);
            if had_errors {
                debug!("csv input is neither utf-8 nor clean gbk; decoded lossily");
            }
            text.into_owned()
        }
    }
}

/// Header row plus data rows. Rows whose every field is blank are dropped.
pub fn parse_rows(text: &str) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
    let mut rdr = ::csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(text.as_bytes());
    let headers: Vec<String> = rdr
        .headers()
        .context("read csv header")?
        .iter()
        .map(str::to_string)
        .collect();
    if headers.iter().all(|h| h.trim().is_empty()) {
        return Err(anyhow!("csv has no header row"));
    }

    let mut rows: Vec<Vec<String>> = Vec::new();
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|| format!("read csv record {}", i + 2))?;
        if rec.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        rows.push(rec.iter().map(str::to_string).collect());
    }
    Ok((headers, rows))
}

pub fn read_rows(path: &Path) -> anyhow::Result<(Vec<String>, Vec<Vec<String>>)> {
    let bytes = std::fs::read(path).with_context(|| format!("read csv: {}", path.display()))?;
    parse_rows(&decode_text(&bytes)).with_context(|| format!("parse csv: {}", path.display()))
}

/// UTF-8 with BOM, quoting only where needed.
pub fn encode_rows(headers: &[String], rows: &[Vec<String>]) -> anyhow::Result<Vec<u8>> {
    let mut buf: Vec<u8> = UTF8_BOM.to_vec();
    {
        let mut w = ::csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(&mut buf);
        w.write_record(headers).context("write csv header")?;
        for row in rows {
            w.write_record(row).context("write csv row")?;
        }
        w.flush().context("flush csv")?;
    }
    Ok(buf)
}

/// Linear backoff for writes that hit a locked or busy target.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            step: Duration::from_millis(400),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.step * attempt
    }
}

// ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
#[cfg(windows)]
fn is_busy_code(code: i32) -> bool {
    matches!(code, 32 | 33)
}

// EBUSY, ETXTBSY
#[cfg(not(windows))]
fn is_busy_code(code: i32) -> bool {
    matches!(code, 16 | 26)
}

fn is_locked(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::PermissionDenied || err.raw_os_error().is_some_and(is_busy_code)
}

fn write_with_retry(path: &Path, data: &[u8], policy: RetryPolicy) -> io::Result<()> {
    let mut attempt = 1u32;
    loop {
        match std::fs::write(path, data) {
            Ok(()) => return Ok(()),
            Err(e) if is_locked(&e) && attempt < policy.attempts => {
                let wait = policy.delay(attempt);
                debug!(path = %path.display(), attempt, ?wait, "target busy, retrying");
                std::thread::sleep(wait);
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{stem}{suffix}.{ext}"),
        None => format!("{stem}{suffix}"),
    };
    path.with_file_name(name)
}

/// Writes `data` to `path`, or to `<stem>_new.<ext>`, `<stem>_new2.<ext>`, ... when the
/// original stays locked. Returns the path actually written.
pub fn write_file_with_fallback(
    path: &Path,
    data: &[u8],
    policy: RetryPolicy,
) -> anyhow::Result<PathBuf> {
    let first_err = match write_with_retry(path, data, policy) {
        Ok(()) => return Ok(path.to_path_buf()),
        Err(e) if is_locked(&e) => e,
        Err(e) => return Err(e).with_context(|| format!("write: {}", path.display())),
    };
    warn!(path = %path.display(), error = %first_err, "output locked, writing to a fallback name");

    let mut candidates: Vec<PathBuf> = vec![sibling(path, "_new")];
    candidates.extend((2..=FALLBACK_LIMIT).map(|n| sibling(path, &format!("_new{n}"))));
    for cand in candidates {
        if cand.exists() {
            continue;
        }
        match std::fs::write(&cand, data) {
            Ok(()) => return Ok(cand),
            Err(e) if is_locked(&e) => continue,
            Err(e) => return Err(e).with_context(|| format!("write: {}", cand.display())),
        }
    }

    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let last = sibling(path, &format!("_{secs}"));
    std::fs::write(&last, data).with_context(|| format!("write: {}", last.display()))?;
    Ok(last)
}

pub fn write_rows(
    path: &Path,
    headers: &[String],
    rows: &[Vec<String>],
    policy: RetryPolicy,
) -> anyhow::Result<PathBuf> {
    let data = encode_rows(headers, rows)?;
    write_file_with_fallback(path, &data, policy)
}
