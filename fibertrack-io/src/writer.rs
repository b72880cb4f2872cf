//! File writers for streamline bundles.

use crate::{Error, Result};
use fibertrack_core::bundle::FiberBundle;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Magic bytes at the start of the binary format.
pub const BINARY_MAGIC: &[u8; 4] = b"FTRK";

/// Output format of a [`FiberWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberFormat {
    /// Legacy ASCII VTK polydata.
    Vtk,
    /// One row per point: `fiber,point,x,y,z`.
    Csv,
    /// Little-endian binary, see [`FiberWriter::write_binary`].
    Binary,
}

impl FiberFormat {
    /// Picks the format from a file extension.
    ///
    /// `.vtk` and `.fib` are VTK, `.csv` is CSV, `.bin` and `.ftrk` are binary.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("vtk" | "fib") => Ok(Self::Vtk),
            Some("csv") => Ok(Self::Csv),
            Some("bin" | "ftrk") => Ok(Self::Binary),
            _ => Err(Error::InvalidFormat(format!(
                "unsupported output extension: {}",
                path.display()
            ))),
        }
    }
}

/// Writer for tracked streamlines.
pub struct FiberWriter {
    writer: BufWriter<File>,
}

impl FiberWriter {
    /// Creates a new file writer.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        Ok(Self { writer })
    }

    /// Writes the bundle in `format`.
    pub fn write(&mut self, bundle: &FiberBundle, format: FiberFormat) -> Result<()> {
        match format {
            FiberFormat::Vtk => self.write_vtk(bundle),
            FiberFormat::Csv => self.write_csv(bundle),
            FiberFormat::Binary => self.write_binary(bundle),
        }
    }

    /// Writes the bundle as legacy ASCII VTK polydata, one line cell per fiber.
    pub fn write_vtk(&mut self, bundle: &FiberBundle) -> Result<()> {
        writeln!(self.writer, "# vtk DataFile Version 3.0")?;
        writeln!(self.writer, "fibertrack streamlines")?;
        writeln!(self.writer, "ASCII")?;
        writeln!(self.writer, "DATASET POLYDATA")?;
        writeln!(self.writer, "POINTS {} float", bundle.total_points())?;
        for i in 0..bundle.total_points() {
            writeln!(self.writer, "{} {} {}", bundle.x[i], bundle.y[i], bundle.z[i])?;
        }

        let fibers = bundle.len();
        writeln!(self.writer, "LINES {} {}", fibers, fibers + bundle.total_points())?;
        for window in bundle.offsets.windows(2) {
            let (start, end) = (window[0], window[1]);
            write!(self.writer, "{}", end - start)?;
            for index in start..end {
                write!(self.writer, " {index}")?;
            }
            writeln!(self.writer)?;
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes one CSV row per point.
    pub fn write_csv(&mut self, bundle: &FiberBundle) -> Result<()> {
        writeln!(self.writer, "fiber,point,x,y,z")?;

        for (fiber, window) in bundle.offsets.windows(2).enumerate() {
            for (point, i) in (window[0]..window[1]).enumerate() {
                writeln!(
                    self.writer,
                    "{},{},{},{},{}",
                    fiber, point, bundle.x[i], bundle.y[i], bundle.z[i]
                )?;
            }
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Writes the bundle as binary data.
    ///
    /// Format: magic `FTRK` + u64 (fiber count), then for each fiber
    /// u32 (point count) followed by f32 (x) + f32 (y) + f32 (z) per point.
    pub fn write_binary(&mut self, bundle: &FiberBundle) -> Result<()> {
        self.writer.write_all(BINARY_MAGIC)?;
        self.writer.write_all(&(bundle.len() as u64).to_le_bytes())?;
        for window in bundle.offsets.windows(2) {
            let count = u32::try_from(window[1] - window[0]).map_err(|_| {
                Error::InvalidFormat("fiber has too many points for u32 count".to_string())
            })?;
            self.writer.write_all(&count.to_le_bytes())?;
            for i in window[0]..window[1] {
                self.writer.write_all(&bundle.x[i].to_le_bytes())?;
                self.writer.write_all(&bundle.y[i].to_le_bytes())?;
                self.writer.write_all(&bundle.z[i].to_le_bytes())?;
            }
        }

        self.writer.flush()?;
        Ok(())
    }

    /// Flushes the writer.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes `bundle` to `path` in the format implied by its extension.
pub fn write_bundle<P: AsRef<Path>>(path: P, bundle: &FiberBundle) -> Result<()> {
    let path = path.as_ref();
    let format = FiberFormat::from_path(path)?;
    FiberWriter::create(path)?.write(bundle, format)?;
    log::info!(
        "Wrote {} streamlines ({} points) to {}",
        bundle.len(),
        bundle.total_points(),
        path.display()
    );
    Ok(())
}
