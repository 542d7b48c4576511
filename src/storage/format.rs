//! Exchange file format

use bytemuck::{Pod, Zeroable};
use bytes::Bytes;
use crc32fast::Hasher;

use crate::record::{Exchange, Headers, RequestRecord, ResponseRecord};
use crate::{Result, RewindError};

/// File magic bytes: "REWIND\x00\x01"
pub const FILE_MAGIC: [u8; 8] = [0x52, 0x45, 0x57, 0x49, 0x4E, 0x44, 0x00, 0x01];

/// Current format version
pub const FILE_VERSION: u32 = 1;

/// Fixed file header size
pub const HEADER_SIZE: usize = 32;

/// File extension of stored exchanges
pub const FILE_EXTENSION: &str = "rewind";

/// File header (32 bytes)
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
#[repr(C)]
pub struct FileHeader {
    /// Magic bytes for file format identification
    pub magic: [u8; 8],

    /// Format version
    pub version: u32,

    /// CRC32 of header (excluding this field)
    pub header_crc: u32,

    /// Payload length in bytes
    pub payload_len: u64,

    /// CRC32 of payload
    pub payload_crc: u32,

    /// Reserved flag bits
    pub flags: u32,
}

static_assertions::const_assert_eq!(std::mem::size_of::<FileHeader>(), HEADER_SIZE);

impl FileHeader {
    fn new(payload: &[u8]) -> Self {
        let mut header = Self {
            magic: FILE_MAGIC,
            version: FILE_VERSION,
            header_crc: 0,
            payload_len: payload.len() as u64,
            payload_crc: crc32fast::hash(payload),
            flags: 0,
        };
        header.header_crc = header.compute_crc();
        header
    }

    /// CRC over every header byte except the CRC field (bytes 12-15)
    fn compute_crc(&self) -> u32 {
        let bytes = bytemuck::bytes_of(self);
        let mut hasher = Hasher::new();
        hasher.update(&bytes[..12]);
        hasher.update(&bytes[16..]);
        hasher.finalize()
    }
}

/// Validate header magic and version
///
/// # Errors
///
/// Returns error if magic or version is invalid
pub fn validate_header(header: &FileHeader) -> Result<()> {
    if header.magic != FILE_MAGIC {
        return Err(RewindError::InvalidFormat(format!(
            "Invalid magic bytes: expected {:?}, got {:?}",
            FILE_MAGIC, header.magic
        )));
    }

    if header.version != FILE_VERSION {
        return Err(RewindError::InvalidFormat(format!(
            "Unsupported version: {}, expected {}",
            header.version, FILE_VERSION
        )));
    }

    Ok(())
}

/// Encode an exchange into file bytes (header + payload)
///
/// # Errors
///
/// Returns error if a field exceeds its length prefix
pub fn encode_exchange(exchange: &Exchange) -> Result<Vec<u8>> {
    let mut payload = Encoder::default();

    payload.u64(exchange.recorded_at);

    // Request
    let request = &exchange.request;
    payload.short_bytes(request.method.as_bytes())?;
    payload.long_bytes(request.url.as_bytes())?;
    payload.headers(&request.headers)?;
    payload.body(&request.body);

    // Response
    let response = &exchange.response;
    payload.u16(response.status);
    payload.headers(&response.headers)?;
    payload.body(&response.body);

    let payload = payload.into_inner();
    let header = FileHeader::new(&payload);

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len());
    data.extend_from_slice(bytemuck::bytes_of(&header));
    data.extend_from_slice(&payload);
    Ok(data)
}

/// Decode file bytes produced by [`encode_exchange`]
///
/// # Errors
///
/// Returns error if the data is truncated, corrupted, or of another version
pub fn decode_exchange(data: &[u8]) -> Result<Exchange> {
    if data.len() < HEADER_SIZE {
        return Err(RewindError::InvalidFormat(
            "File too small to contain header".to_string(),
        ));
    }

    let header: FileHeader = bytemuck::pod_read_unaligned(&data[..HEADER_SIZE]);
    validate_header(&header)?;

    let computed_crc = header.compute_crc();
    if header.header_crc != computed_crc {
        return Err(RewindError::CorruptedData {
            offset: 0,
            expected: header.header_crc,
            actual: computed_crc,
        });
    }

    let payload = &data[HEADER_SIZE..];
    if payload.len() as u64 != header.payload_len {
        return Err(RewindError::InvalidFormat(format!(
            "Payload length mismatch: header says {}, file has {}",
            header.payload_len,
            payload.len()
        )));
    }

    let computed_crc = crc32fast::hash(payload);
    if header.payload_crc != computed_crc {
        return Err(RewindError::CorruptedData {
            offset: HEADER_SIZE as u64,
            expected: header.payload_crc,
            actual: computed_crc,
        });
    }

    let mut decoder = Decoder::new(payload);
    let recorded_at = decoder.u64()?;

    let request = RequestRecord {
        method: decoder.string_u16("method")?,
        url: decoder.string_u32("url")?,
        headers: decoder.headers()?,
        body: decoder.body()?,
    };

    let response = ResponseRecord {
        status: decoder.u16()?,
        headers: decoder.headers()?,
        body: decoder.body()?,
    };

    if !decoder.is_empty() {
        return Err(RewindError::InvalidFormat(
            "Trailing bytes after response".to_string(),
        ));
    }

    Ok(Exchange {
        request,
        response,
        recorded_at,
    })
}

#[derive(Default)]
struct Encoder {
    data: Vec<u8>,
}

impl Encoder {
    fn u16(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn u32(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn u64(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_le_bytes());
    }

    fn short_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| too_large(bytes.len(), u16::MAX as usize))?;
        self.u16(len);
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn long_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| too_large(bytes.len(), u32::MAX as usize))?;
        self.u32(len);
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    fn body(&mut self, body: &[u8]) {
        self.u64(body.len() as u64);
        self.data.extend_from_slice(body);
    }

    fn headers(&mut self, headers: &Headers) -> Result<()> {
        let count = u16::try_from(headers.len()).map_err(|_| too_large(headers.len(), u16::MAX as usize))?;
        self.u16(count);
        for (name, values) in headers.iter() {
            self.short_bytes(name.as_bytes())?;
            let value_count =
                u16::try_from(values.len()).map_err(|_| too_large(values.len(), u16::MAX as usize))?;
            self.u16(value_count);
            for value in values {
                self.long_bytes(value.as_bytes())?;
            }
        }
        Ok(())
    }

    fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

fn too_large(size: usize, limit: usize) -> RewindError {
    RewindError::DataTooLarge { size, limit }
}

struct Decoder<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Decoder<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn is_empty(&self) -> bool {
        self.offset == self.data.len()
    }

    fn take(&mut self, len: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| {
                RewindError::InvalidFormat(format!("Truncated {what} at offset {}", self.offset))
            })?;
        let slice = &self.data[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2, "u16")?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32> {
        let bytes = self.take(4, "u32")?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8, "u64")?);
        Ok(u64::from_le_bytes(buf))
    }

    fn string(&mut self, len: usize, what: &str) -> Result<String> {
        let bytes = self.take(len, what)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| RewindError::InvalidFormat(format!("{what} is not valid UTF-8")))
    }

    fn string_u16(&mut self, what: &str) -> Result<String> {
        let len = self.u16()? as usize;
        self.string(len, what)
    }

    fn string_u32(&mut self, what: &str) -> Result<String> {
        let len = self.u32()? as usize;
        self.string(len, what)
    }

    fn body(&mut self) -> Result<Bytes> {
        let len = usize::try_from(self.u64()?)
            .map_err(|_| RewindError::InvalidFormat("Body length overflows usize".to_string()))?;
        Ok(Bytes::copy_from_slice(self.take(len, "body")?))
    }

    fn headers(&mut self) -> Result<Headers> {
        let count = self.u16()?;
        let mut headers = Headers::new();
        for _ in 0..count {
            let name = self.string_u16("header name")?;
            let value_count = self.u16()?;
            for _ in 0..value_count {
                let value = self.string_u32("header value")?;
                headers.append(&name, value);
            }
        }
        Ok(headers)
    }
}
