use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::store::Tables;

/// Writes the backend state as gzip-compressed JSON.
///
/// The file is written beside the target and renamed over it, so a crash
/// mid-write leaves the previous snapshot intact.
pub fn save_snapshot(tables: &Tables, filename: &Path) -> std::io::Result<()> {
    let tmp = filename.with_extension("tmp");
    {
        let file = File::create(&tmp)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut writer = std::io::BufWriter::new(encoder);

        serde_json::to_writer(&mut writer, tables)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

        let encoder = writer.into_inner().map_err(|e| e.into_error())?;
        encoder.finish()?.flush()?;
    }
    std::fs::rename(&tmp, filename)
}

pub fn load_snapshot(filename: &Path) -> std::io::Result<Tables> {
    let file = File::open(filename)?;
    let decoder = GzDecoder::new(file);
    let reader = std::io::BufReader::new(decoder);

    let tables: Tables = serde_json::from_reader(reader)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    Ok(tables)
}
