//! Acquisition from the DAQ hardware through a capability boundary
//!
//! The vendor SDK lives outside this crate; the core only needs a way to
//! enumerate attached devices ([`DaqHost`]) and to drive one of them
//! ([`DaqDevice`]). [`DeviceSource`] validates the attached hardware,
//! configures continuous sampling and adapts the device to the
//! [`SampleSource`] contract.

use super::{Pull, SampleSource, SourceError};

/// Product type this instrument expects to drive
pub const EXPECTED_DEVICE_MODEL: &str = "USB-6002";

/// One attached acquisition device, as exposed by the hardware layer
pub trait DaqDevice: Send {
    /// Device-type identifier reported by the driver
    fn product_type(&self) -> String;

    /// Configure continuous-mode sampling at the given frequency
    fn configure_continuous(&mut self, freq: f64) -> Result<(), SourceError>;

    /// Arm the device; samples start accumulating in the device buffer
    fn arm(&mut self) -> Result<(), SourceError>;

    /// Block until at least one new sample is available, then drain and
    /// return everything accumulated since the last read
    fn read_available(&mut self) -> Result<Vec<f64>, SourceError>;

    /// Disarm and release the device; must be safe to call when the device
    /// was never armed, or after a failed arm
    fn disarm(&mut self);
}

/// Device enumeration capability of the hardware layer
pub trait DaqHost: Send + Sync {
    /// Enumerate all attached acquisition devices
    fn devices(&self) -> Result<Vec<Box<dyn DaqDevice>>, SourceError>;
}

/// Hardware-backed sample source
pub struct DeviceSource {
    device: Box<dyn DaqDevice>,
}

impl DeviceSource {
    /// Attach to the single expected acquisition device.
    ///
    /// Fails fast if zero or multiple devices are present, or if the one
    /// attached device is not a `USB-6002`. The device is configured for
    /// continuous sampling here but armed only by `start`.
    pub fn attach(host: &dyn DaqHost, freq: f64) -> Result<Self, SourceError> {
        let mut devices = host.devices()?;
        if devices.len() != 1 {
            return Err(SourceError::DeviceCount(devices.len()));
        }
        let mut device = devices.remove(0);

        let product = device.product_type();
        if product != EXPECTED_DEVICE_MODEL {
            return Err(SourceError::DeviceModel {
                expected: EXPECTED_DEVICE_MODEL.to_string(),
                found: product,
            });
        }

        device.configure_continuous(freq)?;
        tracing::info!(model = EXPECTED_DEVICE_MODEL, freq, "acquisition device configured");

        Ok(Self { device })
    }
}

impl SampleSource for DeviceSource {
    fn start(&mut self) -> Result<(), SourceError> {
        self.device.arm()
    }

    fn pull(&mut self) -> Result<Pull, SourceError> {
        Ok(Pull::Batch(self.device.read_available()?))
    }

    fn stop(&mut self) {
        self.device.disarm();
    }
}
