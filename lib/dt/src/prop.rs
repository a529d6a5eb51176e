use alloc::{boxed::Box, vec::Vec};
use core::str;
use utils::endian::{BigEndian32, BigEndian64, EndianData};

/// A device tree property: a name and its raw big-endian payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub name: Box<str>,
    pub data: Box<[u8]>,
}

impl Property {
    pub fn new(name: impl AsRef<str>, data: impl Into<Box<[u8]>>) -> Property {
        Property {
            name: Box::from(name.as_ref()),
            data: data.into(),
        }
    }

    /// A boolean property, e.g. `dma-coherent;`.
    pub fn empty(name: impl AsRef<str>) -> Property {
        Property::new(name, Vec::new())
    }

    /// A NUL-terminated string property, e.g. `status = "okay";`.
    pub fn with_str(name: impl AsRef<str>, value: &str) -> Property {
        Property::with_strlist(name, &[value])
    }

    /// A string list property, e.g. `compatible = "fsl,imx6q-ipu", "fsl,ipu3";`.
    pub fn with_strlist(name: impl AsRef<str>, values: &[&str]) -> Property {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value.as_bytes());
            data.push(0);
        }
        Property::new(name, data)
    }

    /// A cell list property, e.g. `reg = <0x02400000 0x400000>;`.
    pub fn with_cells(name: impl AsRef<str>, cells: &[u32]) -> Property {
        let mut data = Vec::with_capacity(cells.len() * 4);
        for cell in cells {
            data.extend_from_slice(&cell.to_be_bytes());
        }
        Property::new(name, data)
    }
}

impl Property {
    fn value_prefix<const N: usize>(&self) -> Result<[u8; N], PropertyError> {
        self.data
            .get(0..N)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(PropertyError::InvalidPropFormat)
    }

    pub fn value_as_u32(&self) -> Result<u32, PropertyError> {
        Ok(BigEndian32::from_bytes(self.value_prefix()?).value())
    }

    pub fn value_as_u64(&self) -> Result<u64, PropertyError> {
        Ok(BigEndian64::from_bytes(self.value_prefix()?).value())
    }

    pub fn value_as_str(&self) -> Result<&str, PropertyError> {
        str::from_utf8(&self.data)
            .map(|s| s.trim_end_matches('\0'))
            .map_err(|_| PropertyError::InvalidPropFormat)
    }

    pub fn value_as_strlist(&self) -> Result<Vec<&str>, PropertyError> {
        let slice = self.data.as_ref();
        let slice = slice.strip_suffix(&[0]).unwrap_or(slice);
        if slice.is_empty() {
            return Ok(Vec::new());
        }
        slice
            .split(|byte| *byte == 0)
            .map(|item| str::from_utf8(item).map_err(|_| PropertyError::InvalidPropFormat))
            .collect()
    }

    /// Split the payload into 32-bit big-endian cells. Trailing bytes that do not form a whole
    /// cell make the property malformed.
    pub fn value_as_cells(&self) -> Result<Vec<BigEndian32>, PropertyError> {
        if self.data.len() % 4 != 0 {
            return Err(PropertyError::InvalidPropFormat);
        }
        Ok(self
            .data
            .chunks_exact(4)
            .map(|chunk| BigEndian32::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyError {
    InvalidPropFormat,
    PropNotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_lists_split_on_nul() {
        let prop = Property::with_strlist("compatible", &["fsl,imx6q-ipu", "fsl,ipu3"]);
        assert_eq!(
            prop.value_as_strlist().unwrap(),
            ["fsl,imx6q-ipu", "fsl,ipu3"]
        );
        // Unterminated final entry is still reported.
        let raw = Property::new("compatible", b"a\0b".to_vec());
        assert_eq!(raw.value_as_strlist().unwrap(), ["a", "b"]);
        assert!(Property::empty("compatible").value_as_strlist().unwrap().is_empty());
    }

    #[test]
    fn strings_trim_terminator() {
        let prop = Property::with_str("status", "okay");
        assert_eq!(prop.value_as_str().unwrap(), "okay");
        let bad = Property::new("status", [0xffu8, 0xfe].to_vec());
        assert_eq!(bad.value_as_str(), Err(PropertyError::InvalidPropFormat));
    }

    #[test]
    fn cells_are_big_endian() {
        let prop = Property::with_cells("reg", &[0x0240_0000, 0x40_0000]);
        assert_eq!(prop.value_as_u32().unwrap(), 0x0240_0000);
        assert_eq!(prop.value_as_u64().unwrap(), 0x0240_0000_0040_0000);
        let cells = prop.value_as_cells().unwrap();
        assert_eq!(cells[1].value(), 0x40_0000);
        let short = Property::new("reg", [1u8, 2, 3].to_vec());
        assert_eq!(short.value_as_u32(), Err(PropertyError::InvalidPropFormat));
        assert_eq!(short.value_as_cells(), Err(PropertyError::InvalidPropFormat));
    }
}
