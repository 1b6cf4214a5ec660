use candle_util::candle_core::Tensor;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

fn is_gz(file: &str) -> bool {
    Path::new(file).extension().and_then(|x| x.to_str()) == Some("gz")
}

/// Buffered reader over `file`, decompressed on the fly for `.gz`
pub fn open_buf_reader(file: &str) -> anyhow::Result<Box<dyn BufRead>> {
    let raw = File::open(file).map_err(|e| anyhow::anyhow!("{}: {}", file, e))?;
    Ok(if is_gz(file) {
        Box::new(BufReader::new(GzDecoder::new(raw)))
    } else {
        Box::new(BufReader::new(raw))
    })
}

/// Buffered writer to `file` (gzipped for `.gz`); `stdout` writes to
/// the standard output
pub fn open_buf_writer(file: &str) -> anyhow::Result<Box<dyn Write>> {
    if file.eq_ignore_ascii_case("stdout") {
        return Ok(Box::new(BufWriter::new(std::io::stdout())));
    }
    let raw = File::create(file).map_err(|e| anyhow::anyhow!("{}: {}", file, e))?;
    Ok(if is_gz(file) {
        Box::new(BufWriter::new(GzEncoder::new(raw, Compression::default())))
    } else {
        Box::new(BufWriter::new(raw))
    })
}

/// Create the parent directory of `file` if needed
pub fn mkdir(file: &str) -> anyhow::Result<()> {
    match Path::new(file).parent() {
        Some(dir) if !dir.as_os_str().is_empty() => Ok(std::fs::create_dir_all(dir)?),
        _ => Ok(()),
    }
}

/// Write `lines` to `file`, one per line; a closed pipe ends the
/// output quietly
pub fn write_lines(lines: &[Box<str>], file: &str) -> anyhow::Result<()> {
    mkdir(file)?;
    let mut out = open_buf_writer(file)?;
    for line in lines {
        match writeln!(out, "{}", line) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            Err(e) => return Err(anyhow::anyhow!("{}: {}", file, e)),
        }
    }
    out.flush()?;
    Ok(())
}

///
/// Write a 2d tensor as tab-separated rows, each prefixed by its
/// row name, below a header line
///
/// * `header` - column names, including the row name column
/// * `row_names` - one name per row
/// * `mat` - `n x d` tensor
///
pub fn write_tsv_with_names(
    header: &[Box<str>],
    row_names: &[Box<str>],
    mat: &Tensor,
    output_file_path: &str,
) -> anyhow::Result<()> {
    let rows = mat.to_dtype(candle_util::candle_core::DType::F32)?.to_vec2::<f32>()?;
    if rows.len() != row_names.len() {
        return Err(anyhow::anyhow!(
            "{} row names vs. {} rows",
            row_names.len(),
            rows.len()
        ));
    }

    let mut lines: Vec<Box<str>> = Vec::with_capacity(rows.len() + 1);
    lines.push(header.join("\t").into_boxed_str());
    for (name, row) in row_names.iter().zip(rows.iter()) {
        let values = row
            .iter()
            .map(|x| format!("{}", x))
            .collect::<Vec<_>>()
            .join("\t");
        lines.push(format!("{}\t{}", name, values).into_boxed_str());
    }
    write_lines(&lines, output_file_path)
}

/// Column names `{prefix}_1 .. {prefix}_d` after a leading `first` column
pub fn numbered_header(first: &str, prefix: &str, d: usize) -> Vec<Box<str>> {
    std::iter::once(first.to_string().into_boxed_str())
        .chain((1..=d).map(|j| format!("{}_{}", prefix, j).into_boxed_str()))
        .collect()
}
