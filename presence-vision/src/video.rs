use anyhow::{Context, Result};
use image::RgbImage;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::video::Capture;
use v4l::{Device, Format, FourCC};

/// A live stream that yields one RGB frame per call.
pub trait FrameSource: Send {
    fn frame(&mut self) -> Result<RgbImage>;
}

/// Opens a [`FrameSource`]; called once per tracking session.
pub trait StreamSource: Send + Sync {
    fn acquire_stream(&self) -> Result<Box<dyn FrameSource>>;
}

impl<F> StreamSource for F
where
    F: Fn() -> Result<Box<dyn FrameSource>> + Send + Sync,
{
    fn acquire_stream(&self) -> Result<Box<dyn FrameSource>> {
        self()
    }
}

/// A V4L2 device path plus the resolution to request from it.
#[derive(Debug, Clone)]
pub struct DeviceCamera {
    pub device: String,
    pub width: u32,
    pub height: u32,
}

impl DeviceCamera {
    pub fn new(device: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            device: device.into(),
            width,
            height,
        }
    }
}

impl StreamSource for DeviceCamera {
    fn acquire_stream(&self) -> Result<Box<dyn FrameSource>> {
        let camera = Camera::open(&self.device, self.width, self.height)
            .with_context(|| format!("opening camera {}", self.device))?;
        Ok(Box::new(camera))
    }
}

pub struct Camera {
    stream: Stream<'static>,
    width: u32,
    height: u32,
    fourcc: FourCC,
}

impl Camera {
    pub fn open(device: &str, width: u32, height: u32) -> Result<Self> {
        let dev = Device::with_path(device).context("open camera")?;
        let mut fmt = dev.format().context("get format")?;
        // Prefer RGB at the requested size, then YUYV, else whatever the driver picked
        let desired = Format::new(width, height, FourCC::new(b"RGB3"));
        fmt = dev.set_format(&desired).unwrap_or(fmt);
        if fmt.fourcc != FourCC::new(b"RGB3") {
            let yuyv = Format::new(width, height, FourCC::new(b"YUYV"));
            fmt = dev.set_format(&yuyv).unwrap_or(fmt);
        }
        log::info!(
            "camera {} streaming {}x{} {:?}",
            device,
            fmt.width,
            fmt.height,
            fmt.fourcc
        );
        let stream = Stream::with_buffers(&dev, Type::VideoCapture, 4).context("stream")?;
        Ok(Self {
            stream,
            width: fmt.width,
            height: fmt.height,
            fourcc: fmt.fourcc,
        })
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl FrameSource for Camera {
    fn frame(&mut self) -> Result<RgbImage> {
        let (data, meta) = self.stream.next().context("capture frame")?;
        log::trace!(
            "captured frame: seq={} len={} fourcc={:?}",
            meta.sequence,
            data.len(),
            self.fourcc
        );
        let mut buf = match self.fourcc {
            f if f == FourCC::new(b"RGB3") => data.to_vec(),
            f if f == FourCC::new(b"YUYV") => yuyv_to_rgb(self.width, self.height, data)?,
            f if f == FourCC::new(b"GREY") => grey_to_rgb(self.width, self.height, data)?,
            other => anyhow::bail!("unsupported pixel format {:?}", other),
        };
        let expected = (self.width * self.height * 3) as usize;
        if buf.len() < expected {
            anyhow::bail!(
                "buffer too small: got {}, expected {} (fourcc {:?})",
                buf.len(),
                expected,
                self.fourcc
            );
        }
        buf.truncate(expected);
        RgbImage::from_raw(self.width, self.height, buf)
            .ok_or_else(|| anyhow::anyhow!("failed to build image buffer"))
    }
}

pub fn yuyv_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height * 2) as usize;
    if data.len() < expected {
        anyhow::bail!("short YUYV buffer");
    }
    let mut out = Vec::with_capacity((width * height * 3) as usize);
    for chunk in data[..expected].chunks_exact(4) {
        let u = chunk[1] as f32 - 128.0;
        let v = chunk[3] as f32 - 128.0;
        for y in [chunk[0] as f32, chunk[2] as f32] {
            out.push(clamp(y + 1.402 * v));
            out.push(clamp(y - 0.344136 * u - 0.714136 * v));
            out.push(clamp(y + 1.772 * u));
        }
    }
    Ok(out)
}

fn clamp(v: f32) -> u8 {
    v.clamp(0.0, 255.0) as u8
}

pub fn grey_to_rgb(width: u32, height: u32, data: &[u8]) -> Result<Vec<u8>> {
    let expected = (width * height) as usize;
    if data.len() < expected {
        anyhow::bail!("short GREY buffer");
    }
    Ok(data[..expected].iter().flat_map(|&y| [y, y, y]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_neutral_chroma_is_grey() {
        // two pixels, luma 100 and 200, no chroma
        let rgb = yuyv_to_rgb(2, 1, &[100, 128, 200, 128]).unwrap();
        assert_eq!(rgb, vec![100, 100, 100, 200, 200, 200]);
    }

    #[test]
    fn yuyv_clamps_out_of_range() {
        let rgb = yuyv_to_rgb(2, 1, &[255, 255, 255, 255]).unwrap();
        assert!(rgb.iter().all(|&c| c >= 100));
        assert_eq!(rgb[0], 255);
    }

    #[test]
    fn short_buffers_are_rejected() {
        assert!(yuyv_to_rgb(4, 4, &[0; 8]).is_err());
        assert!(grey_to_rgb(4, 4, &[0; 8]).is_err());
    }

    #[test]
    fn grey_expands_to_three_channels() {
        let rgb = grey_to_rgb(2, 1, &[7, 9, 42]).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 9, 9, 9]);
    }

    #[test]
    fn closures_are_stream_sources() {
        struct Still;
        impl FrameSource for Still {
            fn frame(&mut self) -> Result<RgbImage> {
                Ok(RgbImage::new(2, 2))
            }
        }
        let source = || -> Result<Box<dyn FrameSource>> { Ok(Box::new(Still)) };
        let mut stream = source.acquire_stream().unwrap();
        assert_eq!(stream.frame().unwrap().dimensions(), (2, 2));
    }
}
