//! Common, IO-related code.

use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use flate2::bufread::MultiGzDecoder;

/// Transparently open a file with gzip decoder.
pub fn open_read_maybe_gz<P>(path: P) -> Result<Box<dyn BufRead>, std::io::Error>
where
    P: AsRef<Path>,
{
    if is_gz(&path) {
        tracing::trace!("Opening {:?} as gzip for reading", path.as_ref());
        let file = File::open(path)?;
        let bufreader = BufReader::new(file);
        let decoder = MultiGzDecoder::new(bufreader);
        Ok(Box::new(BufReader::new(decoder)))
    } else {
        tracing::trace!("Opening {:?} as plain text for reading", path.as_ref());
        let file = File::open(path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

fn is_gz<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().extension().map(|s| s.to_str()) == Some(Some("gz"))
}

/// The file name that repertoires list in `data_processing_files`.
///
/// This is the base name with a trailing `.gz` removed, so that compressed and
/// uncompressed copies of a file link to the same repertoire.
pub fn data_file_name<P: AsRef<Path>>(path: P) -> String {
    let name = path
        .as_ref()
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.strip_suffix(".gz") {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Write};

    use flate2::{write::GzEncoder, Compression};

    #[rstest::rstest]
    #[case("rearrangements.tsv")]
    #[case("rearrangements.tsv.gz")]
    fn open_read_maybe_gz(#[case] filename: &str) -> Result<(), anyhow::Error> {
        let tmp_dir = temp_testdir::TempDir::default();
        let path = tmp_dir.join(filename);
        {
            let file = std::fs::File::create(&path)?;
            if filename.ends_with(".gz") {
                let mut encoder = GzEncoder::new(file, Compression::default());
                encoder.write_all(b"sequence_id\tv_call\n")?;
                encoder.finish()?;
            } else {
                let mut file = file;
                file.write_all(b"sequence_id\tv_call\n")?;
            }
        }

        let mut reader = super::open_read_maybe_gz(&path)?;
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;

        assert_eq!(buf, "sequence_id\tv_call\n");

        Ok(())
    }

    #[rstest::rstest]
    #[case("/data/study1/sample1.tsv.gz", "sample1.tsv")]
    #[case("sample1.tsv", "sample1.tsv")]
    #[case("cells.json", "cells.json")]
    fn data_file_name(#[case] path: &str, #[case] expected: &str) {
        assert_eq!(super::data_file_name(path), expected);
    }
}
