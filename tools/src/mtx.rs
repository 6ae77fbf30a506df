use anyhow::{bail, format_err, Context, Error};
use flate2::bufread::MultiGzDecoder;
use scan_types::{CountMatrix, FeatureMeta};
use sprs::TriMat;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Open a text file, decompressing it if the name ends in `.gz`.
pub fn open_text(path: impl AsRef<Path>) -> Result<Box<dyn BufRead>, Error> {
    let path = path.as_ref();
    let file = BufReader::new(File::open(path).with_context(|| path.display().to_string())?);
    if path.extension().is_some_and(|e| e == "gz") {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(file))
    }
}

/// Load a feature x cell count matrix from (optionally gzipped) MTX format
pub fn load_mtx(path: impl AsRef<Path>) -> Result<CountMatrix, Error> {
    let path = path.as_ref();
    let mut reader = open_text(path)?;
    let mut line = String::new();
    let mut mat: Option<TriMat<u32>> = None;

    while reader.read_line(&mut line).with_context(|| path.display().to_string())? > 0 {
        if line.starts_with('%') || line.trim().is_empty() {
            line.clear();
            continue;
        }
        let mut data = line.split_whitespace();
        match mat.as_mut() {
            None => {
                let nrow = data.next().ok_or_else(|| format_err!("no NROW"))?.parse::<usize>()?;
                let ncol = data.next().ok_or_else(|| format_err!("no NCOL"))?.parse::<usize>()?;
                let nnz = data.next().ok_or_else(|| format_err!("no NNZ"))?.parse::<usize>()?;
                mat = Some(TriMat::with_capacity((nrow, ncol), nnz));
            }
            Some(m) => {
                let row = data.next().ok_or_else(|| format_err!("missing ROW"))?.parse::<usize>()?;
                let col = data.next().ok_or_else(|| format_err!("missing COL"))?.parse::<usize>()?;
                let val = data.next().ok_or_else(|| format_err!("missing VAL"))?.parse::<u32>()?;
                if row == 0 || col == 0 || row > m.rows() || col > m.cols() {
                    bail!("entry ({}, {}) outside of a {} x {} matrix", row, col, m.rows(), m.cols());
                }
                m.add_triplet(row - 1, col - 1, val);
            }
        }
        line.clear();
    }

    let Some(matrix) = mat else { bail!("no matrix found in {}", path.display()) };
    Ok(matrix.to_csc())
}

/// Non-empty lines of a text file, e.g. barcodes or batch labels
pub fn load_lines(path: impl AsRef<Path>) -> Result<Vec<String>, Error> {
    let mut out = Vec::new();
    for line in open_text(path)?.lines() {
        let line = line?;
        let line = line.trim_end();
        if !line.is_empty() {
            out.push(line.to_string());
        }
    }
    Ok(out)
}

/// Features from a Cell Ranger style `features.tsv`: id, name and an optional feature type.
/// A single column is used as both id and name.
pub fn load_features(path: impl AsRef<Path>) -> Result<Vec<FeatureMeta>, Error> {
    load_lines(path)?
        .iter()
        .map(|line| {
            let mut fields = line.split('\t');
            let id = fields.next().ok_or_else(|| format_err!("empty feature line"))?;
            let name = fields.next().unwrap_or(id);
            Ok(FeatureMeta::new(id, name))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scan-pipeline-tools-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    fn write_gz(path: &Path, text: &str) {
        let mut gz = GzEncoder::new(File::create(path).unwrap(), Compression::default());
        gz.write_all(text.as_bytes()).unwrap();
        gz.finish().unwrap();
    }

    #[test]
    fn test_load_mtx() {
        let path = scratch("matrix.mtx.gz");
        write_gz(
            &path,
            "%%MatrixMarket matrix coordinate integer general\n%\n3 2 3\n1 1 5\n3 1 2\n2 2 7\n",
        );
        let m = load_mtx(&path).unwrap();
        assert_eq!(m.shape(), (3, 2));
        assert!(m.is_csc());
        assert_eq!(m.get(0, 0), Some(&5));
        assert_eq!(m.get(2, 0), Some(&2));
        assert_eq!(m.get(1, 1), Some(&7));
        assert_eq!(m.nnz(), 3);
    }

    #[test]
    fn test_load_mtx_errors() {
        let bad = scratch("bad.mtx");
        std::fs::write(&bad, "2 2 1\n3 1 4\n").unwrap();
        assert!(load_mtx(&bad).is_err());

        let empty = scratch("empty.mtx");
        std::fs::write(&empty, "%% only a comment\n").unwrap();
        assert!(load_mtx(&empty).is_err());
        assert!(load_mtx(scratch("missing.mtx")).is_err());
    }

    #[test]
    fn test_load_features_and_lines() {
        let path = scratch("features.tsv.gz");
        write_gz(&path, "ENSG1\tGAPDH\tGene Expression\nENSG2\tMT-CO1\tGene Expression\nENSG3\n");
        let features = load_features(&path).unwrap();
        assert_eq!(features.len(), 3);
        assert_eq!(features[1].id, "ENSG2");
        assert_eq!(features[1].name, "MT-CO1");
        assert_eq!(features[2].name, "ENSG3");

        let lines = scratch("barcodes.tsv");
        std::fs::write(&lines, "AAAC-1\nAAAG-1\n\n").unwrap();
        assert_eq!(load_lines(&lines).unwrap(), vec!["AAAC-1", "AAAG-1"]);
    }
}
