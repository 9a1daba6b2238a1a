//! Frame dispatch.
//!
//! On a frame-ready signal the dispatcher resolves the frame geometry and the
//! buffer's base address, wraps them in a [`FrameDescriptor`], and calls every
//! registered [`FrameObserver`] in registration order on the capture thread.
//!
//! The descriptor borrows native memory. It lives only for the duration of the
//! dispatch call; the buffer goes back to the native pool right after.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::api::{GrabberApi, Handle, Param};
use crate::error::{ErrorReporter, GrabberError, Result};

/// Borrowed view of one captured frame.
///
/// Not `Send`, and bound to the dispatch call: observers cannot keep it.
pub struct FrameDescriptor<'a> {
    address: NonNull<u8>,
    width: u32,
    height: u32,
    pitch: u32,
    buffer: Handle,
    sequence: u64,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> FrameDescriptor<'a> {
    /// Build a descriptor over caller-guaranteed memory.
    ///
    /// # Safety
    ///
    /// `address` must point to at least `pitch * height` readable bytes that
    /// stay valid and unmodified for `'a`.
    #[allow(unsafe_code)]
    pub unsafe fn from_raw_parts(
        address: NonNull<u8>,
        width: u32,
        height: u32,
        pitch: u32,
        buffer: Handle,
        sequence: u64,
    ) -> Self {
        Self {
            address,
            width,
            height,
            pitch,
            buffer,
            sequence,
            _borrow: PhantomData,
        }
    }

    /// Base address of the frame in native memory.
    pub fn address(&self) -> *const u8 {
        self.address.as_ptr()
    }

    /// Image width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Image height in lines.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Row stride in bytes.
    pub fn pitch(&self) -> u32 {
        self.pitch
    }

    /// Native handle of the buffer holding the frame.
    pub fn buffer(&self) -> Handle {
        self.buffer
    }

    /// Position of this frame in the channel's delivery order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Total bytes covered by the frame (`pitch * height`).
    pub fn len(&self) -> usize {
        self.pitch as usize * self.height as usize
    }

    /// Whether the frame covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame bytes.
    ///
    /// # Safety
    ///
    /// The native layer must have filled `pitch * height` bytes at
    /// [`address`](Self::address). This holds for descriptors handed out by
    /// the dispatcher.
    #[allow(unsafe_code)]
    pub unsafe fn bytes(&self) -> &[u8] {
        std::slice::from_raw_parts(self.address.as_ptr(), self.len())
    }

    /// One image row (`pitch` bytes), or `None` past the last line.
    ///
    /// # Safety
    ///
    /// Same contract as [`bytes`](Self::bytes).
    #[allow(unsafe_code)]
    pub unsafe fn row(&self, line: u32) -> Option<&[u8]> {
        if line >= self.height {
            return None;
        }
        let start = line as usize * self.pitch as usize;
        Some(&self.bytes()[start..start + self.pitch as usize])
    }
}

impl fmt::Debug for FrameDescriptor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameDescriptor")
            .field("address", &self.address)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("pitch", &self.pitch)
            .field("buffer", &self.buffer)
            .field("sequence", &self.sequence)
            .finish()
    }
}

/// Receives every captured frame, synchronously on the capture thread.
///
/// A slow observer holds the buffer and stalls the whole capture pipeline.
/// Hand the data off to another thread if processing takes longer than a
/// frame period.
pub trait FrameObserver: Send {
    /// Called once per frame.
    fn on_frame(&mut self, frame: &FrameDescriptor<'_>);
}

impl<F> FrameObserver for F
where
    F: FnMut(&FrameDescriptor<'_>) + Send,
{
    fn on_frame(&mut self, frame: &FrameDescriptor<'_>) {
        self(frame)
    }
}

/// Observers in registration order.
pub(crate) type ObserverList = Arc<Mutex<Vec<Box<dyn FrameObserver>>>>;

/// Resolves filled buffers into frames and fans them out to observers.
pub struct FrameDispatcher {
    api: Arc<dyn GrabberApi>,
    instance: Handle,
    observers: ObserverList,
}

impl FrameDispatcher {
    pub(crate) fn new(api: Arc<dyn GrabberApi>, instance: Handle, observers: ObserverList) -> Self {
        Self {
            api,
            instance,
            observers,
        }
    }

    /// Deliver the frame held by `buffer` to every observer.
    ///
    /// Returns once all observers have returned. The caller frees the buffer.
    pub fn dispatch(&self, buffer: Handle, sequence: u64) -> Result<()> {
        let width = self.channel_int(grabber_sys::PARAM_IMAGE_SIZE_X, buffer)?;
        let height = self.channel_int(grabber_sys::PARAM_IMAGE_SIZE_Y, buffer)?;
        let pitch = self.channel_int(grabber_sys::PARAM_BUFFER_PITCH, buffer)?;

        let mut raw: *mut c_void = std::ptr::null_mut();
        let status = self
            .api
            .get_ptr(buffer, Param::Id(grabber_sys::PARAM_SURFACE_ADDR), &mut raw);
        ErrorReporter::new(self.api.as_ref()).frame_geometry(status, buffer)?;
        let address = NonNull::new(raw.cast::<u8>()).ok_or_else(|| GrabberError::FrameGeometry {
            buffer,
            code: status,
            message: "null surface address".to_string(),
        })?;

        // SAFETY: the native layer reports `address` as the base of a filled
        // surface of `pitch * height` bytes. The surface stays Filled until the
        // caller frees it after this function returns.
        #[allow(unsafe_code)]
        let frame =
            unsafe { FrameDescriptor::from_raw_parts(address, width, height, pitch, buffer, sequence) };

        trace!(buffer = %buffer, sequence, width, height, pitch, "Dispatching frame");

        let mut observers = self.observers.lock();
        for observer in observers.iter_mut() {
            observer.on_frame(&frame);
        }
        Ok(())
    }

    fn channel_int(&self, param: u32, buffer: Handle) -> Result<u32> {
        let mut value = 0;
        let status = self.api.get_int(self.instance, Param::Id(param), &mut value);
        ErrorReporter::new(self.api.as_ref()).frame_geometry(status, buffer)?;
        u32::try_from(value).map_err(|_| GrabberError::FrameGeometry {
            buffer,
            code: status,
            message: format!("negative value {} for parameter {}", value, Param::Id(param)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_rows() {
        let data: Vec<u8> = (0..12).collect();
        let address = NonNull::new(data.as_ptr() as *mut u8).unwrap();
        #[allow(unsafe_code)]
        let frame = unsafe { FrameDescriptor::from_raw_parts(address, 3, 3, 4, Handle(1), 0) };

        assert_eq!(frame.len(), 12);
        #[allow(unsafe_code)]
        unsafe {
            assert_eq!(frame.row(1), Some(&[4u8, 5, 6, 7][..]));
            assert_eq!(frame.row(3), None);
            assert_eq!(frame.bytes().len(), 12);
        }
    }

    #[test]
    fn test_closure_observer() {
        let data = [7u8; 4];
        let address = NonNull::new(data.as_ptr() as *mut u8).unwrap();
        #[allow(unsafe_code)]
        let frame = unsafe { FrameDescriptor::from_raw_parts(address, 2, 2, 2, Handle(9), 5) };

        let mut seen = Vec::new();
        {
            let mut observer = |f: &FrameDescriptor<'_>| seen.push((f.buffer(), f.sequence()));
            observer.on_frame(&frame);
        }
        assert_eq!(seen, vec![(Handle(9), 5)]);
    }
}
