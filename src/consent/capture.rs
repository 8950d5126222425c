//! Consent capture files.
//!
//! A capture is a JPEG of the consenting person's head written into the
//! capture directory. The file is fsynced before close so the directory
//! monitor never observes a partial image.

use crate::consent::filename::{capture_filename, sanitize_name};
use crate::defaults;
use crate::error::{FaceveilError, Result};
use chrono::Local;
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes consent captures into a directory.
pub struct CaptureWriter {
    dir: PathBuf,
}

impl CaptureWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Saves a head crop for the given (unsanitized) name. The timestamp is
    /// taken at the moment of the call; colliding paths get `_2`, `_3`, …
    /// suffixes. Returns the written path.
    pub fn save(&self, image: &RgbImage, name: Option<&str>) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;

        let safe_name = sanitize_name(name);
        let now = Local::now().naive_local();

        let mut suffix: Option<u32> = None;
        let path = loop {
            let candidate = self.dir.join(capture_filename(&safe_name, &now, suffix));
            if !candidate.exists() {
                break candidate;
            }
            suffix = Some(suffix.map_or(2, |n| n + 1));
        };

        write_jpeg(&path, image)?;
        log::info!(
            "consent capture saved: {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(path)
    }
}

fn write_jpeg(path: &Path, image: &RgbImage) -> Result<()> {
    let file = File::create(path).map_err(|e| FaceveilError::CaptureWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    {
        let mut writer = BufWriter::new(&file);
        let encoder = JpegEncoder::new_with_quality(&mut writer, defaults::CAPTURE_JPEG_QUALITY);
        image
            .write_with_encoder(encoder)
            .map_err(|e| FaceveilError::CaptureWrite {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        writer.flush().map_err(|e| FaceveilError::CaptureWrite {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    }

    // Flush to disk before the create event is acted on, so the monitor
    // never loads a truncated JPEG.
    file.sync_all().map_err(|e| FaceveilError::CaptureWrite {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    Ok(())
}
