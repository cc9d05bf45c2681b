//! Reading import files: plain delimited text or ZIP archives

use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;

use super::error::ImportError;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const MANIFEST_NAME: &str = "manifest.json";

/// Conventional names of the primary CSV inside an export archive
const PREFERRED_CSV_NAMES: &[&str] = &["transactions.csv", "import.csv", "export.csv", "firefly.csv"];

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// What an input file turned out to be
#[derive(Debug)]
pub enum ImportInput {
    /// Delimited text, possibly extracted from an archive
    Delimited { name: String, bytes: Vec<u8> },
    /// A full backup archive; handled by restore, not by the import pipeline
    Backup(Vec<u8>),
}

/// One data row: header -> value, blank cells absent
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    /// 1-based data row number (header excluded)
    pub row: usize,
    pub fields: HashMap<String, Option<String>>,
}

impl RawRecord {
    pub fn get(&self, header: &str) -> Option<&str> {
        self.fields.get(header).and_then(|v| v.as_deref())
    }
}

#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub headers: Vec<String>,
    pub records: Vec<RawRecord>,
}

/// Read a file from disk and work out what it is
pub fn read_input(path: &Path) -> Result<ImportInput, ImportError> {
    let bytes = fs::read(path)
        .map_err(|e| ImportError::Unreadable(format!("{}: {}", path.display(), e)))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    read_input_bytes(&name, bytes)
}

/// Same as [`read_input`] for in-memory content
pub fn read_input_bytes(name: &str, bytes: Vec<u8>) -> Result<ImportInput, ImportError> {
    if bytes.is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let is_zip = name.to_lowercase().ends_with(".zip") || bytes.starts_with(ZIP_MAGIC);
    if !is_zip {
        return Ok(ImportInput::Delimited {
            name: name.to_string(),
            bytes,
        });
    }

    match pick_archive_entry(name, &bytes)? {
        ArchiveEntry::Manifest => {
            tracing::info!(archive = name, "archive has a manifest, treating as backup");
            Ok(ImportInput::Backup(bytes))
        }
        ArchiveEntry::Csv { name: entry, content } => {
            tracing::debug!(archive = name, entry = %entry, "using csv from archive");
            Ok(ImportInput::Delimited {
                name: entry,
                bytes: content,
            })
        }
    }
}

enum ArchiveEntry {
    Manifest,
    Csv { name: String, content: Vec<u8> },
}

fn pick_archive_entry(archive_name: &str, bytes: &[u8]) -> Result<ArchiveEntry, ImportError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ImportError::Unreadable(format!("{}: invalid archive: {}", archive_name, e)))?;

    let mut csv_entries: Vec<(usize, String, u64)> = Vec::new();
    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| ImportError::Unreadable(e.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        let entry_name = entry.name().to_string();
        if base_name(&entry_name).eq_ignore_ascii_case(MANIFEST_NAME) {
            return Ok(ArchiveEntry::Manifest);
        }
        if entry_name.to_lowercase().ends_with(".csv") {
            csv_entries.push((i, entry_name, entry.size()));
        }
    }

    let (index, name, _) = csv_entries
        .iter()
        .find(|(_, n, _)| {
            let base = base_name(n).to_lowercase();
            PREFERRED_CSV_NAMES.contains(&base.as_str())
        })
        .or_else(|| csv_entries.iter().max_by_key(|(_, _, size)| *size))
        .ok_or(ImportError::NoCsvInArchive)?;

    let mut entry = archive
        .by_index(*index)
        .map_err(|e| ImportError::Unreadable(e.to_string()))?;
    let mut content = Vec::new();
    entry
        .read_to_end(&mut content)
        .map_err(|e| ImportError::Unreadable(format!("{}: {}", name, e)))?;

    Ok(ArchiveEntry::Csv {
        name: name.clone(),
        content,
    })
}

fn base_name(entry: &str) -> &str {
    entry.rsplit(['/', '\\']).next().unwrap_or(entry)
}

/// Pick the delimiter that splits the header line into the most columns
fn sniff_delimiter(text: &str) -> u8 {
    let header_line = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    CANDIDATE_DELIMITERS
        .iter()
        .copied()
        .max_by_key(|d| header_line.bytes().filter(|b| b == d).count())
        .filter(|d| header_line.as_bytes().contains(d))
        .unwrap_or(b',')
}

/// Parse delimited text with a header row into raw records
pub fn parse_delimited(bytes: &[u8]) -> Result<ParsedFile, ImportError> {
    let bytes = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ImportError::Unreadable(format!("file is not valid UTF-8: {}", e)))?;
    if text.trim().is_empty() {
        return Err(ImportError::EmptyFile);
    }

    let delimiter = sniff_delimiter(text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| ImportError::InvalidHeaders(e.to_string()))?
        .iter()
        .map(|h| h.to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(|h| h.is_empty()) {
        return Err(ImportError::InvalidHeaders("header row is empty".to_string()));
    }
    if let Some(pos) = headers.iter().position(|h| h.is_empty()) {
        return Err(ImportError::InvalidHeaders(format!(
            "column {} has no name",
            pos + 1
        )));
    }

    let mut records = Vec::new();
    for (i, result) in reader.records().enumerate() {
        let row = i + 1;
        let record = result.map_err(|e| ImportError::Unreadable(format!("row {}: {}", row, e)))?;
        if record.iter().all(|v| v.is_empty()) {
            continue;
        }
        let fields = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| {
                let value = record
                    .get(idx)
                    .filter(|v| !v.is_empty())
                    .map(|v| v.to_string());
                (h.clone(), value)
            })
            .collect();
        records.push(RawRecord { row, fields });
    }

    tracing::debug!(
        columns = headers.len(),
        rows = records.len(),
        delimiter = %(delimiter as char),
        "parsed delimited file"
    );
    Ok(ParsedFile { headers, records })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            for (name, content) in entries {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(content.as_bytes()).unwrap();
            }
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[test]
    fn test_parse_comma_with_bom() {
        let data = b"\xEF\xBB\xBFdate,amount,account\n2024-01-01,10.00,Nubank\n";
        let parsed = parse_delimited(data).unwrap();
        assert_eq!(parsed.headers, vec!["date", "amount", "account"]);
        assert_eq!(parsed.records.len(), 1);
        assert_eq!(parsed.records[0].row, 1);
        assert_eq!(parsed.records[0].get("amount"), Some("10.00"));
    }

    #[test]
    fn test_parse_semicolon_keeps_decimal_commas() {
        let data = "data;valor;conta\n15/03/2024;1.500,00;Nubank\n";
        let parsed = parse_delimited(data.as_bytes()).unwrap();
        assert_eq!(parsed.headers.len(), 3);
        assert_eq!(parsed.records[0].get("valor"), Some("1.500,00"));
    }

    #[test]
    fn test_blank_cells_are_absent_and_blank_rows_skipped() {
        let data = "date,amount,notes\n2024-01-01,5,\n,,\n2024-01-02,6,hi\n";
        let parsed = parse_delimited(data.as_bytes()).unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.records[0].get("notes"), None);
        // row numbers keep counting through the blank line
        assert_eq!(parsed.records[1].row, 3);
    }

    #[test]
    fn test_short_rows_are_tolerated() {
        let data = "date,amount,notes\n2024-01-01,5\n";
        let parsed = parse_delimited(data.as_bytes()).unwrap();
        assert_eq!(parsed.records[0].get("notes"), None);
    }

    #[test]
    fn test_file_level_errors() {
        assert!(matches!(parse_delimited(b""), Err(ImportError::EmptyFile)));
        assert!(matches!(parse_delimited(b"  \n\n"), Err(ImportError::EmptyFile)));
        assert!(matches!(
            parse_delimited(b"date,,amount\n1,2,3\n"),
            Err(ImportError::InvalidHeaders(_))
        ));
        assert!(matches!(
            read_input_bytes("x.csv", Vec::new()),
            Err(ImportError::EmptyFile)
        ));
    }

    #[test]
    fn test_plain_text_passthrough() {
        let input = read_input_bytes("file.csv", b"a,b\n1,2\n".to_vec()).unwrap();
        assert!(matches!(input, ImportInput::Delimited { name, .. } if name == "file.csv"));
    }

    #[test]
    fn test_zip_prefers_conventional_name() {
        let bytes = zip_with(&[
            ("big.csv", "a,b\n1,2\n3,4\n5,6\n7,8\n"),
            ("export/Transactions.csv", "date,amount\n"),
        ]);
        match read_input_bytes("export.zip", bytes).unwrap() {
            ImportInput::Delimited { name, bytes } => {
                assert_eq!(name, "export/Transactions.csv");
                assert_eq!(bytes, b"date,amount\n");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zip_falls_back_to_largest_csv() {
        let bytes = zip_with(&[
            ("small.csv", "a\n1\n"),
            ("large.csv", "a,b,c\n1,2,3\n4,5,6\n"),
            ("readme.txt", "this file is not csv and is quite long indeed"),
        ]);
        match read_input_bytes("data.bin", bytes).unwrap() {
            ImportInput::Delimited { name, .. } => assert_eq!(name, "large.csv"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_zip_with_manifest_is_backup() {
        let bytes = zip_with(&[("manifest.json", "{}"), ("accounts.csv", "id\n")]);
        assert!(matches!(
            read_input_bytes("backup.zip", bytes).unwrap(),
            ImportInput::Backup(_)
        ));
    }

    #[test]
    fn test_zip_without_csv() {
        let bytes = zip_with(&[("notes.txt", "hello")]);
        assert!(matches!(
            read_input_bytes("a.zip", bytes),
            Err(ImportError::NoCsvInArchive)
        ));
    }
}
