use crate::common_io::open_buf_reader;

use log::info;
use ndarray::Array2;
use rayon::prelude::*;
use std::io::Read;
use std::path::Path;

pub const IMAGE_MAGIC: u32 = 2051;
pub const LABEL_MAGIC: u32 = 2049;
pub const NUM_PIXELS: usize = 28 * 28;

pub const TRAIN_IMAGES: &str = "train-images-idx3-ubyte";
pub const TRAIN_LABELS: &str = "train-labels-idx1-ubyte";
pub const TEST_IMAGES: &str = "t10k-images-idx3-ubyte";
pub const TEST_LABELS: &str = "t10k-labels-idx1-ubyte";

/// Binarized images (n x 784, row-major pixels in {0, 1}) with labels
pub struct MnistData {
    pub images: Array2<f32>,
    pub labels: Vec<u8>,
}

impl MnistData {
    pub fn num_images(&self) -> usize {
        self.images.nrows()
    }

    /// index of the first image with this label
    pub fn first_of_label(&self, label: u8) -> Option<usize> {
        self.labels.iter().position(|&l| l == label)
    }
}

pub struct MnistSplit {
    pub train: MnistData,
    pub test: MnistData,
}

/// Scaled intensity (x / 255) above which a pixel is set to 1
pub const BINARIZE_THRESHOLD: f32 = 0.5;

fn read_u32_be<R: Read>(reader: &mut R) -> anyhow::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_be_bytes(buf))
}

/// `{dir}/{name}.gz` if it exists, otherwise `{dir}/{name}`
fn resolve_idx_file(dir: &Path, name: &str) -> anyhow::Result<Box<str>> {
    let gz = dir.join(format!("{}.gz", name));
    let raw = dir.join(name);
    let found = if gz.exists() {
        gz
    } else if raw.exists() {
        raw
    } else {
        return Err(anyhow::anyhow!("neither {:?} nor {:?} exists", gz, raw));
    };
    found
        .to_str()
        .map(|s| s.to_string().into_boxed_str())
        .ok_or(anyhow::anyhow!("invalid path {:?}", found))
}

///
/// Read an IDX image file, keep the first `max_images`, and binarize
/// each pixel (x / 255 > 0.5)
///
/// * `file` - IDX3 file, either gzipped or not
/// * `max_images` - how many images to keep at most
///
pub fn read_idx_images(file: &str, max_images: Option<usize>) -> anyhow::Result<Array2<f32>> {
    let mut reader = open_buf_reader(file)?;

    let magic = read_u32_be(&mut reader)?;
    if magic != IMAGE_MAGIC {
        return Err(anyhow::anyhow!(
            "{}: magic number {} is not an image file ({})",
            file,
            magic,
            IMAGE_MAGIC
        ));
    }

    let n = read_u32_be(&mut reader)? as usize;
    let nrow = read_u32_be(&mut reader)? as usize;
    let ncol = read_u32_be(&mut reader)? as usize;
    let d = nrow * ncol;
    let n = max_images.map_or(n, |m| m.min(n));

    let mut pixels = vec![0u8; n * d];
    reader.read_exact(&mut pixels)?;

    let data: Vec<f32> = pixels
        .into_par_iter()
        .map(|x| {
            if (x as f32 / 255.0) > BINARIZE_THRESHOLD {
                1.0
            } else {
                0.0
            }
        })
        .collect();

    Ok(Array2::from_shape_vec((n, d), data)?)
}

///
/// Read an IDX label file, keep the first `max_labels`
///
pub fn read_idx_labels(file: &str, max_labels: Option<usize>) -> anyhow::Result<Vec<u8>> {
    let mut reader = open_buf_reader(file)?;

    let magic = read_u32_be(&mut reader)?;
    if magic != LABEL_MAGIC {
        return Err(anyhow::anyhow!(
            "{}: magic number {} is not a label file ({})",
            file,
            magic,
            LABEL_MAGIC
        ));
    }

    let n = read_u32_be(&mut reader)? as usize;
    let n = max_labels.map_or(n, |m| m.min(n));

    let mut labels = vec![0u8; n];
    reader.read_exact(&mut labels)?;

    if let Some(bad) = labels.iter().find(|&&l| l > 9) {
        return Err(anyhow::anyhow!("{}: invalid label {}", file, bad));
    }
    Ok(labels)
}

fn read_pair(dir: &Path, images: &str, labels: &str, max_n: usize) -> anyhow::Result<MnistData> {
    let images = read_idx_images(&resolve_idx_file(dir, images)?, Some(max_n))?;
    let labels = read_idx_labels(&resolve_idx_file(dir, labels)?, Some(max_n))?;

    if images.nrows() != labels.len() {
        return Err(anyhow::anyhow!(
            "{} images vs. {} labels",
            images.nrows(),
            labels.len()
        ));
    }
    if images.ncols() != NUM_PIXELS {
        return Err(anyhow::anyhow!(
            "expected {} pixels per image, found {}",
            NUM_PIXELS,
            images.ncols()
        ));
    }
    Ok(MnistData { images, labels })
}

///
/// Load the standard MNIST files under `dir` and take the first
/// `n_train` training and `n_test` test images
///
pub fn load_mnist(dir: &Path, n_train: usize, n_test: usize) -> anyhow::Result<MnistSplit> {
    let train = read_pair(dir, TRAIN_IMAGES, TRAIN_LABELS, n_train)?;
    let test = read_pair(dir, TEST_IMAGES, TEST_LABELS, n_test)?;

    info!(
        "MNIST: train {} x {}, test {} x {}",
        train.images.nrows(),
        train.images.ncols(),
        test.images.nrows(),
        test.images.ncols()
    );

    Ok(MnistSplit { train, test })
}

///
/// Load only the first `n_test` images of the t10k files under `dir`
///
pub fn load_mnist_test(dir: &Path, n_test: usize) -> anyhow::Result<MnistData> {
    let test = read_pair(dir, TEST_IMAGES, TEST_LABELS, n_test)?;
    info!("MNIST: test {} x {}", test.images.nrows(), test.images.ncols());
    Ok(test)
}
