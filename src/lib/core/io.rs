use anyhow::Result;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

/// Build a TSV reader for optional file/stdin sources.
pub fn get_reader<P: AsRef<Path>>(
    path: &Option<P>,
    has_headers: bool,
    gzipped: bool,
) -> Result<csv::Reader<Box<dyn Read>>> {
    let raw_reader: Box<dyn Read> = match path {
        Some(path) if path.as_ref().to_str() != Some("-") => {
            let reader = BufReader::new(File::open(path)?);
            if gzipped {
                Box::new(MultiGzDecoder::new(reader))
            } else {
                Box::new(reader)
            }
        }
        _ => {
            let reader = io::stdin();
            if gzipped {
                Box::new(MultiGzDecoder::new(reader))
            } else {
                Box::new(reader)
            }
        }
    };

    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(has_headers)
        .from_reader(raw_reader))
}

/// Build a TSV writer targeting a file or stdout with optional gzip compression.
pub fn get_writer<P: AsRef<Path>>(
    path: &Option<P>,
    gzipped: bool,
    write_headers: bool,
    compression_level: u32,
) -> Result<csv::Writer<Box<dyn Write>>> {
    let raw_writer: Box<dyn Write> = match path {
        Some(path) if path.as_ref().to_str() != Some("-") => {
            let writer = BufWriter::new(File::create(path)?);
            if gzipped {
                Box::new(GzEncoder::new(writer, Compression::new(compression_level)))
            } else {
                Box::new(writer)
            }
        }
        _ => {
            let writer = BufWriter::new(io::stdout());
            if gzipped {
                Box::new(GzEncoder::new(writer, Compression::new(compression_level)))
            } else {
                Box::new(writer)
            }
        }
    };

    Ok(csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(write_headers)
        .from_writer(raw_writer))
}

/// Open a line-oriented text file, transparently decompressing `.gz` inputs.
pub fn open_text<P: AsRef<Path>>(path: P) -> Result<Box<dyn io::BufRead>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader: Box<dyn io::BufRead> = if crate::core::fs::is_gzipped(path) {
        Box::new(BufReader::with_capacity(
            256 * 1024,
            MultiGzDecoder::new(file),
        ))
    } else {
        Box::new(BufReader::with_capacity(256 * 1024, file))
    };
    Ok(reader)
}
