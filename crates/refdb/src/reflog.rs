use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use refdb_hash::ObjectId;

use crate::error::RefError;
use crate::name::RefName;

/// Who performed a ref change, for reflog purposes.
///
/// Serialized as `Name <email> <timestamp> <±HHMM>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub name: BString,
    pub email: BString,
    /// Seconds since the epoch.
    pub timestamp: i64,
    /// Timezone offset in minutes east of UTC.
    pub tz_offset: i16,
}

impl Ident {
    pub fn new(name: impl Into<BString>, email: impl Into<BString>, timestamp: i64, tz_offset: i16) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            timestamp,
            tz_offset,
        }
    }

    /// Parse `Name <email> <timestamp> <±HHMM>`.
    pub fn parse(data: &BStr) -> Result<Self, RefError> {
        let lt = data
            .find_byte(b'<')
            .ok_or_else(|| malformed_ident(data))?;
        let gt = data[lt..]
            .find_byte(b'>')
            .map(|i| lt + i)
            .ok_or_else(|| malformed_ident(data))?;

        let name = data[..lt].trim_end().as_bstr().to_owned();
        let email = data[lt + 1..gt].as_bstr().to_owned();

        let rest = data[gt + 1..].trim();
        let mut fields = rest.splitn_str(2, b" ");
        let ts = fields
            .next()
            .and_then(|f| std::str::from_utf8(f).ok())
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| malformed_ident(data))?;
        let tz = fields
            .next()
            .and_then(parse_tz)
            .ok_or_else(|| malformed_ident(data))?;

        Ok(Self {
            name,
            email,
            timestamp: ts,
            tz_offset: tz,
        })
    }

    /// Serialize to the identity format used in reflog lines.
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::from(Vec::with_capacity(64));
        out.push_str(&self.name);
        out.push_str(b" <");
        out.push_str(&self.email);
        out.push_str(b"> ");
        out.push_str(self.timestamp.to_string());
        out.push(b' ');
        let sign = if self.tz_offset < 0 { '-' } else { '+' };
        let abs = self.tz_offset.unsigned_abs();
        out.push_str(format!("{}{:02}{:02}", sign, abs / 60, abs % 60));
        out
    }
}

fn parse_tz(field: &[u8]) -> Option<i16> {
    let s = std::str::from_utf8(field).ok()?;
    let (sign, digits) = match s.as_bytes().first()? {
        b'+' => (1i16, &s[1..]),
        b'-' => (-1i16, &s[1..]),
        _ => return None,
    };
    if digits.len() != 4 {
        return None;
    }
    let hours: i16 = digits[..2].parse().ok()?;
    let minutes: i16 = digits[2..].parse().ok()?;
    Some(sign * (hours * 60 + minutes))
}

fn malformed_ident(data: &BStr) -> RefError {
    RefError::Malformed {
        name: "reflog identity".into(),
        content: data.to_str_lossy().into_owned(),
    }
}

/// A single reflog entry recording a ref value change.
///
/// Line format: `<old-hex> SP <new-hex> SP <ident>\t<message>\n`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflogEntry {
    pub old_id: ObjectId,
    pub new_id: ObjectId,
    pub ident: Ident,
    pub message: BString,
}

impl ReflogEntry {
    /// Parse a reflog entry from a single line (without trailing newline).
    pub fn parse(line: &BStr) -> Result<Self, RefError> {
        let line = line.as_bytes();

        // Two 40-char hex ids and their separators come first.
        if line.len() < 82 || line[40] != b' ' || line[81] != b' ' {
            return Err(RefError::Malformed {
                name: "reflog line".into(),
                content: line.as_bstr().to_str_lossy().into_owned(),
            });
        }

        let old_hex = std::str::from_utf8(&line[..40])
            .map_err(|_| malformed_ident(line.as_bstr()))?;
        let new_hex = std::str::from_utf8(&line[41..81])
            .map_err(|_| malformed_ident(line.as_bstr()))?;
        let old_id = ObjectId::from_hex(old_hex)?;
        let new_id = ObjectId::from_hex(new_hex)?;

        let rest = &line[82..];
        let (ident_part, message) = match rest.find_byte(b'\t') {
            Some(tab) => (&rest[..tab], &rest[tab + 1..]),
            None => (rest, &b""[..]),
        };

        let ident = Ident::parse(ident_part.as_bstr())?;
        let message = message.strip_suffix(b"\n").unwrap_or(message);

        Ok(Self {
            old_id,
            new_id,
            ident,
            message: BString::from(message),
        })
    }

    /// Serialize to the reflog line format (without trailing newline).
    pub fn to_bytes(&self) -> BString {
        let mut out = BString::from(Vec::with_capacity(256));
        out.push_str(self.old_id.to_hex());
        out.push(b' ');
        out.push_str(self.new_id.to_hex());
        out.push(b' ');
        out.push_str(self.ident.to_bytes());
        out.push(b'\t');
        out.push_str(&self.message);
        out
    }
}

/// Writes ref change records under the `logs/` tree.
///
/// Policy (which changes get logged, and with what message) belongs to
/// callers; this type only appends and reads what it is told.
#[derive(Debug)]
pub struct ReflogWriter {
    git_dir: PathBuf,
}

impl ReflogWriter {
    pub fn new(git_dir: impl Into<PathBuf>) -> Self {
        Self {
            git_dir: git_dir.into(),
        }
    }

    /// Create the `logs/` directory structure.
    pub fn create(&self) -> Result<(), RefError> {
        let logs = self.git_dir.join("logs");
        let refs = logs.join("refs");
        fs::create_dir_all(&refs).map_err(|e| RefError::IoPath {
            path: refs,
            source: e,
        })?;
        Ok(())
    }

    /// The log file path for a ref name.
    pub fn log_for(&self, name: &str) -> PathBuf {
        self.git_dir.join("logs").join(name)
    }

    /// Append one entry to the log of `name`, creating parent directories
    /// on demand.
    pub fn log(
        &self,
        name: &RefName,
        old_id: ObjectId,
        new_id: ObjectId,
        ident: &Ident,
        message: &str,
    ) -> Result<(), RefError> {
        let path = self.log_for(name.as_str());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| RefError::IoPath {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let entry = ReflogEntry {
            old_id,
            new_id,
            ident: ident.clone(),
            message: BString::from(message),
        };
        let mut line = entry.to_bytes();
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| RefError::IoPath {
                path: path.clone(),
                source: e,
            })?;
        file.write_all(&line).map_err(|e| RefError::IoPath {
            path: path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Read all entries for `name`, newest first. Missing log → empty.
    pub fn read(&self, name: &str) -> Result<Vec<ReflogEntry>, RefError> {
        let path = self.log_for(name);
        let contents = match fs::read(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(RefError::IoPath {
                    path: path.clone(),
                    source: e,
                })
            }
        };

        let mut entries = Vec::new();
        for line in contents.lines() {
            if line.is_empty() {
                continue;
            }
            entries.push(ReflogEntry::parse(line.as_bstr())?);
        }
        entries.reverse();
        Ok(entries)
    }
}

/// Helper used by the store: remove a log or ref file and prune up to
/// `depth` now-empty parent directories.
pub(crate) fn delete_file_and_prune(file: &Path, depth: usize) -> Result<(), RefError> {
    match fs::remove_file(file) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(RefError::IoPath {
                path: file.to_path_buf(),
                source: e,
            })
        }
    }
    let mut dir = file.parent();
    for _ in 0..depth {
        match dir {
            Some(d) => {
                if fs::remove_dir(d).is_err() {
                    break; // not empty, or already gone
                }
                dir = d.parent();
            }
            None => break,
        }
    }
    Ok(())
}
