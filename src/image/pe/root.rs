//! The metadata root and its stream directory (ECMA-335, Partition II, 24.2.1).

use crate::{
    file::io::{push_le, read_le_at},
    Error, Result,
};

/// `BSJB`
const SIGNATURE: u32 = 0x424A_5342;
/// Version string written into new images
const DEFAULT_VERSION: &str = "v4.0.30319";

/// One named stream and its contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Stream {
    pub(crate) name: String,
    pub(crate) data: Vec<u8>,
}

/// The metadata root with every stream's contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MetadataRoot {
    major: u16,
    minor: u16,
    version: String,
    flags: u16,
    pub(crate) streams: Vec<Stream>,
}

impl MetadataRoot {
    /// A root for a new image with no streams.
    pub(crate) fn new() -> Self {
        MetadataRoot {
            major: 1,
            minor: 1,
            version: DEFAULT_VERSION.to_string(),
            flags: 0,
            streams: Vec::new(),
        }
    }

    /// Parse the root at the start of `data`.
    ///
    /// # Errors
    /// Returns [`Error::NotSupported`] for a missing signature and [`Error::OutOfBounds`] if a
    /// stream lies outside `data`.
    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut offset = 0;
        if read_le_at::<u32>(data, &mut offset)? != SIGNATURE {
            return Err(Error::NotSupported);
        }
        let major = read_le_at::<u16>(data, &mut offset)?;
        let minor = read_le_at::<u16>(data, &mut offset)?;
        offset += 4;
        let length = read_le_at::<u32>(data, &mut offset)? as usize;
        let raw = data.get(offset..offset + length).ok_or(Error::OutOfBounds)?;
        let end = raw.iter().position(|byte| *byte == 0).unwrap_or(raw.len());
        let version = String::from_utf8_lossy(&raw[..end]).into_owned();
        offset += length;

        let flags = read_le_at::<u16>(data, &mut offset)?;
        let count = read_le_at::<u16>(data, &mut offset)?;
        let mut streams = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let stream_offset = read_le_at::<u32>(data, &mut offset)? as usize;
            let size = read_le_at::<u32>(data, &mut offset)? as usize;

            let tail = data.get(offset..).ok_or(Error::OutOfBounds)?;
            let len = tail
                .iter()
                .take(32)
                .position(|byte| *byte == 0)
                .ok_or_else(|| malformed_error!("Unterminated stream name"))?;
            let name = String::from_utf8_lossy(&tail[..len]).into_owned();
            offset += (len + 4) & !3;

            let contents = stream_offset
                .checked_add(size)
                .and_then(|end| data.get(stream_offset..end))
                .ok_or(Error::OutOfBounds)?;
            streams.push(Stream {
                name,
                data: contents.to_vec(),
            });
        }

        Ok(MetadataRoot {
            major,
            minor,
            version,
            flags,
            streams,
        })
    }

    /// Contents of the stream called `name`
    pub(crate) fn stream(&self, name: &str) -> Option<&[u8]> {
        self.streams
            .iter()
            .find(|stream| stream.name == name)
            .map(|stream| stream.data.as_slice())
    }

    /// Replace the contents of `name`, appending the stream if it does not exist.
    pub(crate) fn set_stream(&mut self, name: &str, data: Vec<u8>) {
        match self.streams.iter_mut().find(|stream| stream.name == name) {
            Some(stream) => stream.data = data,
            None => self.streams.push(Stream {
                name: name.to_string(),
                data,
            }),
        }
    }

    /// Encode the root followed by every stream, each 4-byte aligned.
    pub(crate) fn encode(&self) -> Result<Vec<u8>> {
        let mut version = self.version.as_bytes().to_vec();
        version.push(0);
        while version.len() % 4 != 0 {
            version.push(0);
        }

        let directory: usize = self
            .streams
            .iter()
            .map(|stream| 8 + ((stream.name.len() + 4) & !3))
            .sum();
        let header = 16 + version.len() + 4 + directory;

        let mut out = Vec::new();
        push_le(&mut out, SIGNATURE);
        push_le(&mut out, self.major);
        push_le(&mut out, self.minor);
        push_le(&mut out, 0_u32);
        push_le(&mut out, to_u32(version.len())?);
        out.extend_from_slice(&version);
        push_le(&mut out, self.flags);
        push_le(
            &mut out,
            u16::try_from(self.streams.len()).map_err(|_| malformed_error!("Too many streams"))?,
        );

        let mut position = header;
        for stream in &self.streams {
            let padded = (stream.data.len() + 3) & !3;
            push_le(&mut out, to_u32(position)?);
            push_le(&mut out, to_u32(padded)?);
            out.extend_from_slice(stream.name.as_bytes());
            let name_len = (stream.name.len() + 4) & !3;
            out.resize(out.len() + name_len - stream.name.len(), 0);
            position += padded;
        }

        for stream in &self.streams {
            out.extend_from_slice(&stream.data);
            while out.len() % 4 != 0 {
                out.push(0);
            }
        }
        Ok(out)
    }
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value).map_err(|_| malformed_error!("Metadata exceeds 4 GiB"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_then_parse() {
        let mut root = MetadataRoot::new();
        root.set_stream("#~", vec![1, 2, 3, 4, 5]);
        root.set_stream("#Strings", vec![0, b'A', 0]);
        root.set_stream("#~", vec![9; 8]);

        let bytes = root.encode().unwrap();
        assert_eq!(bytes.len() % 4, 0);
        let parsed = MetadataRoot::parse(&bytes).unwrap();
        assert_eq!(parsed.version, "v4.0.30319");
        assert_eq!(parsed.streams.len(), 2);
        assert_eq!(parsed.stream("#~"), Some(&[9; 8][..]));
        assert_eq!(parsed.stream("#Strings"), Some(&[0, b'A', 0, 0][..]));
        assert_eq!(parsed.stream("#Blob"), None);
    }

    #[test]
    fn rejects_foreign_and_truncated_roots() {
        assert!(matches!(MetadataRoot::parse(&[0; 32]), Err(Error::NotSupported)));

        let mut root = MetadataRoot::new();
        root.set_stream("#GUID", vec![0; 16]);
        let bytes = root.encode().unwrap();
        assert!(matches!(
            MetadataRoot::parse(&bytes[..bytes.len() - 4]),
            Err(Error::OutOfBounds)
        ));
    }
}
