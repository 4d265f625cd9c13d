//! MuPDF-backed document

use std::path::{Path, PathBuf};

use image::RgbImage;
use log::info;
use mupdf::{Colorspace, Matrix, Pixmap};

use super::document::{Document, PageRenderer};
use super::error::RenderFault;
use super::types::{PageSize, Resolution};

/// A PDF file on disk.
///
/// Page geometry is read once on open; every renderer opens the file again
/// on its own thread since MuPDF documents cannot cross threads.
#[derive(Debug)]
pub struct MupdfDocument {
    path: PathBuf,
    page_sizes: Vec<PageSize>,
}

impl MupdfDocument {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RenderFault> {
        let path = path.as_ref().to_path_buf();
        let doc = open_mupdf(&path)?;
        let page_count = usize::try_from(doc.page_count()?).unwrap_or(0);

        let mut page_sizes = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let bounds = doc.load_page(index as i32)?.bounds()?;
            page_sizes.push(PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0));
        }

        info!("Opened {} ({page_count} pages)", path.display());
        Ok(Self { path, page_sizes })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Document for MupdfDocument {
    fn page_count(&self) -> usize {
        self.page_sizes.len()
    }

    fn page_size(&self, page: usize) -> Option<PageSize> {
        self.page_sizes.get(page).copied()
    }

    fn open_renderer(&self) -> Result<Box<dyn PageRenderer>, RenderFault> {
        Ok(Box::new(MupdfRenderer {
            doc: open_mupdf(&self.path)?,
        }))
    }
}

fn open_mupdf(path: &Path) -> Result<mupdf::Document, RenderFault> {
    Ok(mupdf::Document::open(path.to_string_lossy().as_ref())?)
}

struct MupdfRenderer {
    doc: mupdf::Document,
}

impl PageRenderer for MupdfRenderer {
    fn render(&mut self, page: usize, resolution: Resolution) -> Result<RgbImage, RenderFault> {
        let index = i32::try_from(page).map_err(|_| RenderFault::backend("page index overflow"))?;
        let page = self.doc.load_page(index)?;

        let scale = resolution.scale();
        let transform = Matrix::new_scale(scale, scale);
        let pixmap = page.to_pixmap(&transform, &Colorspace::device_rgb(), false, false)?;
        pixmap_to_rgb(&pixmap)
    }
}

fn pixmap_to_rgb(pixmap: &Pixmap) -> Result<RgbImage, RenderFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(RenderFault::backend(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let width = pixmap.width() as usize;
    let height = pixmap.height() as usize;
    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let row_bytes = width * n;
    if samples.len() < stride.saturating_mul(height) || row_bytes > stride {
        return Err(RenderFault::backend("Pixmap buffer size mismatch"));
    }

    let mut out = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        let row = &samples[y * stride..y * stride + row_bytes];
        if n == 3 {
            out.extend_from_slice(row);
        } else {
            for px in row.chunks_exact(n) {
                out.extend_from_slice(&px[..3]);
            }
        }
    }

    RgbImage::from_raw(pixmap.width(), pixmap.height(), out)
        .ok_or_else(|| RenderFault::backend("Pixmap size does not match its samples"))
}
