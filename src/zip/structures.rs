use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::io::{self, Cursor, Write};
use std::time::SystemTime;

use super::FormatError;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// General purpose bit flags
pub mod flags {
    pub const ENCRYPTED: u16 = 1 << 0;
    /// CRC and sizes follow the data in a data descriptor.
    pub const DATA_DESCRIPTOR: u16 = 1 << 3;
    /// File name is UTF-8.
    pub const UTF8: u16 = 1 << 11;
}

/// "Version needed to extract" for deflate and directories (2.0)
pub const VERSION_NEEDED: u16 = 20;
/// Upper byte 3 = UNIX, so readers honor the mode bits in external attributes.
pub const VERSION_MADE_BY: u16 = (3 << 8) | VERSION_NEEDED;

/// MS-DOS directory attribute bit
pub const DOS_DIRECTORY_ATTR: u32 = 0x10;

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Default)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(FormatError::InvalidHeader("end of central directory"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(Self::SIGNATURE)?;
        w.write_u16::<LittleEndian>(self.disk_number)?;
        w.write_u16::<LittleEndian>(self.disk_with_cd)?;
        w.write_u16::<LittleEndian>(self.disk_entries)?;
        w.write_u16::<LittleEndian>(self.total_entries)?;
        w.write_u32::<LittleEndian>(self.cd_size)?;
        w.write_u32::<LittleEndian>(self.cd_offset)?;
        w.write_u16::<LittleEndian>(self.comment_len)
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(FormatError::InvalidHeader("ZIP64 locator"));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(FormatError::InvalidHeader("ZIP64 end of central directory"));
        }

        // Skip record size, versions, and disk numbers
        let mut cursor = Cursor::new(&data[24..]);
        let _disk_entries = cursor.read_u64::<LittleEndian>()?;

        Ok(Self {
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// Data descriptor - 16 bytes with its optional signature
pub const DATA_DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

/// Header fields shared by the local and central records of one entry.
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub modified: DosDateTime,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub file_name: String,
}

impl EntryHeader {
    /// Write the local file header preceding the entry data.
    pub fn write_local<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(LFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        // Streamed entries defer CRC and sizes to the data descriptor
        self.write_common(w, self.flags & flags::DATA_DESCRIPTOR != 0)?;
        w.write_u16::<LittleEndian>(0)?; // extra field length
        w.write_all(self.file_name.as_bytes())
    }

    /// Write the central directory record pointing at `lfh_offset`.
    pub fn write_central<W: Write>(
        &self,
        w: &mut W,
        external_attrs: u32,
        lfh_offset: u32,
    ) -> io::Result<()> {
        w.write_all(CDFH_SIGNATURE)?;
        w.write_u16::<LittleEndian>(VERSION_MADE_BY)?;
        w.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        self.write_common(w, false)?;
        w.write_u16::<LittleEndian>(0)?; // extra field length
        w.write_u16::<LittleEndian>(0)?; // comment length
        w.write_u16::<LittleEndian>(0)?; // disk number start
        w.write_u16::<LittleEndian>(0)?; // internal attributes
        w.write_u32::<LittleEndian>(external_attrs)?;
        w.write_u32::<LittleEndian>(lfh_offset)?;
        w.write_all(self.file_name.as_bytes())
    }

    /// Write the data descriptor that trails streamed entry data.
    pub fn write_descriptor<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(DATA_DESCRIPTOR_SIGNATURE)?;
        w.write_u32::<LittleEndian>(self.crc32)?;
        w.write_u32::<LittleEndian>(self.compressed_size)?;
        w.write_u32::<LittleEndian>(self.uncompressed_size)
    }

    fn write_common<W: Write>(&self, w: &mut W, deferred: bool) -> io::Result<()> {
        w.write_u16::<LittleEndian>(self.flags)?;
        w.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        w.write_u16::<LittleEndian>(self.modified.time)?;
        w.write_u16::<LittleEndian>(self.modified.date)?;

        if deferred {
            w.write_all(&[0u8; 12])?;
        } else {
            w.write_u32::<LittleEndian>(self.crc32)?;
            w.write_u32::<LittleEndian>(self.compressed_size)?;
            w.write_u32::<LittleEndian>(self.uncompressed_size)?;
        }

        let name_len = u16::try_from(self.file_name.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "entry name too long"))?;
        w.write_u16::<LittleEndian>(name_len)
    }
}

/// Timestamp in the packed MS-DOS format used by ZIP headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    /// 1980-01-01 00:00:00, the earliest representable value.
    pub const MIN: Self = Self {
        time: 0,
        date: (1 << 5) | 1,
    };

    pub fn from_naive(dt: NaiveDateTime) -> Self {
        if dt.year() < 1980 {
            return Self::MIN;
        }
        let year = dt.year().min(2107) as u16;

        Self {
            time: ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2),
            date: ((year - 1980) << 9) | ((dt.month() as u16) << 5) | dt.day() as u16,
        }
    }

    /// Convert using the local time zone, as unzip tools interpret it.
    pub fn from_system_time(time: SystemTime) -> Self {
        let local: chrono::DateTime<chrono::Local> = time.into();
        Self::from_naive(local.naive_local())
    }

    /// Parse to (year, month, day)
    pub fn ymd(&self) -> (u16, u8, u8) {
        let day = (self.date & 0x1F) as u8;
        let month = ((self.date >> 5) & 0x0F) as u8;
        let year = ((self.date >> 9) & 0x7F) + 1980;
        (year, month, day)
    }

    /// Parse to (hour, minute, second)
    pub fn hms(&self) -> (u8, u8, u8) {
        let second = ((self.time & 0x1F) * 2) as u8;
        let minute = ((self.time >> 5) & 0x3F) as u8;
        let hour = ((self.time >> 11) & 0x1F) as u8;
        (hour, minute, second)
    }
}

/// One record of the central directory: a file or a directory.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Slash-separated path relative to the archive root.
    pub path: String,
    /// Stored path ends with `/`.
    pub is_directory: bool,
    pub flags: u16,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub modified: DosDateTime,
}

impl ArchiveEntry {
    pub fn is_encrypted(&self) -> bool {
        self.flags & flags::ENCRYPTED != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn dos_time_packs_and_unpacks() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(13, 45, 31)
            .unwrap();
        let dos = DosDateTime::from_naive(dt);

        assert_eq!(dos.ymd(), (2024, 3, 15));
        // two-second resolution
        assert_eq!(dos.hms(), (13, 45, 30));
    }

    #[test]
    fn dos_time_clamps_before_epoch() {
        let dt = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(DosDateTime::from_naive(dt), DosDateTime::MIN);
        assert_eq!(DosDateTime::MIN.ymd(), (1980, 1, 1));
    }

    #[test]
    fn eocd_round_trips() {
        let eocd = EndOfCentralDirectory {
            disk_entries: 3,
            total_entries: 3,
            cd_size: 150,
            cd_offset: 4096,
            ..Default::default()
        };
        let mut buf = Vec::new();
        eocd.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), EndOfCentralDirectory::SIZE);

        let parsed = EndOfCentralDirectory::from_bytes(&buf).unwrap();
        assert_eq!(parsed.total_entries, 3);
        assert_eq!(parsed.cd_offset, 4096);
        assert!(!parsed.is_zip64());
    }

    #[test]
    fn streamed_local_header_defers_sizes() {
        let header = EntryHeader {
            flags: flags::DATA_DESCRIPTOR | flags::UTF8,
            compression_method: CompressionMethod::Deflate,
            modified: DosDateTime::MIN,
            crc32: 0xDEADBEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            file_name: "a.txt".to_string(),
        };
        let mut buf = Vec::new();
        header.write_local(&mut buf).unwrap();

        assert_eq!(buf.len(), LFH_SIZE + 5);
        assert_eq!(&buf[14..26], &[0u8; 12]);
        assert_eq!(&buf[30..], b"a.txt");
    }

    #[test]
    fn central_record_carries_streamed_sizes() {
        let header = EntryHeader {
            flags: flags::DATA_DESCRIPTOR | flags::UTF8,
            compression_method: CompressionMethod::Deflate,
            modified: DosDateTime::MIN,
            crc32: 0xDEADBEEF,
            compressed_size: 10,
            uncompressed_size: 20,
            file_name: "a.txt".to_string(),
        };
        let mut buf = Vec::new();
        header.write_central(&mut buf, 0, 0).unwrap();

        assert_eq!(buf.len(), CDFH_MIN_SIZE + 5);
        let mut cursor = Cursor::new(&buf[16..28]);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 0xDEADBEEF);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 10);
        assert_eq!(cursor.read_u32::<LittleEndian>().unwrap(), 20);
    }
}
