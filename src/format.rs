//! Firmware file formats
use std::str;
use std::{borrow::Cow, path::Path};

use anyhow::Result;
use object::{
    Endianness, Object, ObjectSection, elf::FileHeader32, elf::PT_LOAD, read::elf::FileHeader,
    read::elf::ProgramHeader,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareFormat {
    PlainHex,
    IntelHex,
    ELF,
    Binary,
}

/// A contiguous run of bytes to program at `address`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub address: u32,
    pub data: Vec<u8>,
}

impl Block {
    pub fn end(&self) -> u64 {
        self.address as u64 + self.data.len() as u64
    }
}

/// Firmware to flash: non-empty, address ordered, non-overlapping blocks.
///
/// Every block is announced with its own `M_SENDMEMADDRESS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    blocks: Vec<Block>,
}

impl FirmwareImage {
    pub fn new(blocks: Vec<Block>) -> Result<Self> {
        let sections = blocks
            .into_iter()
            .map(|b| (b.address, Cow::Owned(b.data)))
            .collect();
        Ok(FirmwareImage {
            blocks: coalesce(sections)?,
        })
    }

    /// A single block starting at `address`.
    pub fn from_binary(address: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(vec![Block { address, data }])
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Read a firmware file. Raw binary and plain hex are placed at `base_address`.
pub fn read_firmware_from_file<P: AsRef<Path>>(path: P, base_address: u32) -> Result<FirmwareImage> {
    let p = path.as_ref();
    let raw = std::fs::read(p)?;
    anyhow::ensure!(!raw.is_empty(), "{} is empty", p.display());

    let format = guess_format(p, &raw);
    log::info!("Read {} as {:?} format", p.display(), format);
    match format {
        FirmwareFormat::PlainHex => FirmwareImage::from_binary(base_address, read_hex(str::from_utf8(&raw)?)?),
        FirmwareFormat::IntelHex => read_ihex(str::from_utf8(&raw)?),
        FirmwareFormat::ELF => objcopy_blocks(&raw),
        FirmwareFormat::Binary => FirmwareImage::from_binary(base_address, raw),
    }
}

pub fn guess_format(path: &Path, raw: &[u8]) -> FirmwareFormat {
    let ext = path
        .extension()
        .map(|s| s.to_string_lossy())
        .unwrap_or_default()
        .to_lowercase();
    if ["ihex", "ihe", "h86", "hex", "a43", "a90"].contains(&&*ext) {
        return FirmwareFormat::IntelHex;
    }

    if raw.starts_with(&[0x7f, b'E', b'L', b'F']) {
        FirmwareFormat::ELF
    } else if raw.first() == Some(&b':')
        && raw
            .iter()
            .all(|&c| c.is_ascii_hexdigit() || c == b':' || c == b'\n' || c == b'\r')
    {
        FirmwareFormat::IntelHex
    } else if raw
        .iter()
        .all(|&c| c.is_ascii_hexdigit() || c.is_ascii_whitespace())
    {
        FirmwareFormat::PlainHex
    } else {
        FirmwareFormat::Binary
    }
}

pub fn read_hex(data: &str) -> Result<Vec<u8>> {
    let digits: String = data.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    Ok(hex::decode(digits)?)
}

pub fn read_ihex(data: &str) -> Result<FirmwareImage> {
    use ihex::Record;

    let mut base_address = 0;

    let mut records = vec![];
    for record in ihex::Reader::new(data) {
        let record = record?;
        use Record::*;
        match record {
            Data { offset, value } => {
                let offset = base_address + offset as u32;

                records.push((offset, value.into()));
            }
            EndOfFile => (),
            ExtendedSegmentAddress(address) => {
                base_address = (address as u32) * 16;
            }
            StartSegmentAddress { .. } => (),
            ExtendedLinearAddress(address) => {
                base_address = (address as u32) << 16;
            }
            StartLinearAddress(_) => (),
        };
    }
    Ok(FirmwareImage {
        blocks: coalesce(records)?,
    })
}

/// Loadable ELF32 segments, one block per contiguous address range.
pub fn objcopy_blocks(elf_data: &[u8]) -> Result<FirmwareImage> {
    let file_kind = object::FileKind::parse(elf_data)?;

    match file_kind {
        object::FileKind::Elf32 => (),
        _ => anyhow::bail!("cannot read file as ELF32 format"),
    }
    let elf_header = FileHeader32::<Endianness>::parse(elf_data)?;
    let binary = object::read::elf::ElfFile::<FileHeader32<Endianness>>::parse(elf_data)?;
    let endian = elf_header.endian()?;

    let mut sections = vec![];
    for segment in elf_header.program_headers(endian, elf_data)? {
        // Physical address: where the data is programmed
        let p_paddr: u64 = segment.p_paddr(endian).into();

        let segment_data = segment
            .data(endian, elf_data)
            .map_err(|_| anyhow::format_err!("Failed to access data for an ELF segment."))?;
        if segment_data.is_empty() || segment.p_type(endian) != PT_LOAD {
            continue;
        }
        log::debug!(
            "Loadable segment at {:#010x}, {} bytes, flags {:#x}",
            p_paddr,
            segment_data.len(),
            segment.p_flags(endian)
        );
        let (segment_offset, segment_filesize) = segment.file_range(endian);
        for section in binary.sections() {
            let Some((section_offset, section_filesize)) = section.file_range() else {
                continue;
            };
            if section_filesize != 0
                && segment_offset <= section_offset
                && segment_offset + segment_filesize >= section_offset + section_filesize
            {
                log::debug!("  section {:?}", section.name()?);
            }
        }
        sections.push((p_paddr as u32, Cow::Borrowed(segment_data)));
    }

    if sections.is_empty() {
        anyhow::bail!("empty ELF file");
    }
    Ok(FirmwareImage {
        blocks: coalesce(sections)?,
    })
}

/// Sort by address, join touching sections, keep gaps as separate blocks.
fn coalesce(mut sections: Vec<(u32, Cow<[u8]>)>) -> Result<Vec<Block>> {
    sections.retain(|(_, data)| !data.is_empty());
    sections.sort_by_key(|(addr, _)| *addr);
    anyhow::ensure!(!sections.is_empty(), "firmware image has no data");

    let mut blocks: Vec<Block> = vec![];
    for (addr, data) in sections {
        anyhow::ensure!(
            addr as u64 + data.len() as u64 <= u32::MAX as u64 + 1,
            "section at {:#010x} runs past the address space",
            addr
        );
        match blocks.last_mut() {
            Some(last) if last.end() > addr as u64 => {
                anyhow::bail!("section at {:#010x} overlaps previous data", addr)
            }
            Some(last) if last.end() == addr as u64 => last.data.extend_from_slice(&data),
            _ => blocks.push(Block {
                address: addr,
                data: data.into_owned(),
            }),
        }
    }
    log::debug!("firmware image: {} block(s)", blocks.len());
    Ok(blocks)
}
