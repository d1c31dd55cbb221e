use crate::error::{EngineError, EngineResult};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Write `value` as gzip-compressed JSON, replacing the file atomically
pub fn write_snapshot<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let data = serde_json::to_vec(value)?;
    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        encoder.write_all(&data)?;
        encoder.finish()?.flush()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot; `None` when the file does not exist yet
pub fn read_snapshot<T: DeserializeOwned>(path: &Path) -> EngineResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let mut raw = Vec::new();
    BufReader::new(file).read_to_end(&mut raw)?;

    // Accept plain JSON too (gzip magic bytes 1f 8b)
    let data = if raw.len() >= 2 && raw[0] == 0x1f && raw[1] == 0x8b {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut decompressed = Vec::new();
        decoder.read_to_end(&mut decompressed)?;
        decompressed
    } else {
        raw
    };
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| EngineError::Storage(format!("Corrupt snapshot {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_snapshot_round_trip() {
        let dir = std::env::temp_dir().join(format!("ks-snapshot-{}", uuid::Uuid::new_v4()));
        let path = dir.join("draft.json.gz");

        let mut value = BTreeMap::new();
        value.insert("Europe".to_string(), 741);
        write_snapshot(&path, &value).unwrap();

        let loaded: Option<BTreeMap<String, i32>> = read_snapshot(&path).unwrap();
        assert_eq!(loaded, Some(value));

        let missing: Option<BTreeMap<String, i32>> = read_snapshot(&dir.join("none.json.gz")).unwrap();
        assert!(missing.is_none());
        std::fs::remove_dir_all(dir).ok();
    }
}
