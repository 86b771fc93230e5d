//! Identification data reported by INQUIRY

/// Vendor, product and serial strings of the device
///
/// All string fields are ASCII, space padded to their fixed width.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub(crate) vendor: [u8; 8],
    pub(crate) product: [u8; 16],
    pub(crate) revision: [u8; 4],
    pub(crate) serial: [u8; 12],
    pub(crate) eui64: [u8; 8],
    pub(crate) removable: bool,
}

impl Default for Identity {
    fn default() -> Self {
        Identity {
            vendor: pad(b"usbd"),
            product: pad(b"Mass Storage"),
            revision: pad(b"0001"),
            serial: pad(b"000000000001"),
            eui64: [0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
            removable: true,
        }
    }
}

impl Identity {
    /// T10 vendor identification, truncated to 8 bytes
    pub fn vendor(mut self, vendor: &[u8]) -> Self {
        self.vendor = pad(vendor);
        self
    }

    /// Product identification, truncated to 16 bytes
    pub fn product(mut self, product: &[u8]) -> Self {
        self.product = pad(product);
        self
    }

    /// Product revision level, truncated to 4 bytes
    pub fn revision(mut self, revision: &[u8]) -> Self {
        self.revision = pad(revision);
        self
    }

    /// Unit serial number, truncated to 12 bytes
    pub fn serial(mut self, serial: &[u8]) -> Self {
        self.serial = pad(serial);
        self
    }

    /// Base of the EUI-64 designator. The LUN index is added to the last byte.
    pub fn eui64(mut self, eui64: [u8; 8]) -> Self {
        self.eui64 = eui64;
        self
    }

    pub fn removable(mut self, removable: bool) -> Self {
        self.removable = removable;
        self
    }
}

fn pad<const N: usize>(src: &[u8]) -> [u8; N] {
    let mut field = [b' '; N];
    let len = src.len().min(N);
    field[..len].copy_from_slice(&src[..len]);
    field
}
