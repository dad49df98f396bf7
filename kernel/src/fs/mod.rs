//! Read-only file system over a contiguous in-memory image.
//!
//! Image layout, in 4096-byte blocks:
//!
//! * block 0 is the boot block: three `u32` counters (dentries, inodes,
//!   data blocks), 52 reserved bytes, then up to 63 directory entries of
//!   64 bytes each (`name[32]`, `type`, `inode`, 24 reserved);
//! * blocks `1..=n_inodes` hold the inodes: a `u32` byte size followed
//!   by up to 1023 data-block indices;
//! * the remaining `n_datablocks` blocks hold raw data.
//!
//! Every accessor is bounds-checked against the image; dentries and
//! inodes are returned by value, never as pointers into the image.

use spin::Once;

use crate::error::KernelError;

pub const BLOCK_SIZE: usize = 4096;
pub const DENTRY_SIZE: usize = 64;
pub const NAME_LEN: usize = 32;
pub const MAX_DENTRIES: usize = 63;
/// Data-block indices one inode block can hold.
pub const INODE_SLOTS: usize = BLOCK_SIZE / 4 - 1;

/// Offset of the entry point inside an executable image.
const ELF_ENTRY_OFFSET: usize = 24;
const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// File types as stored in a dentry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum FileType {
    Rtc = 0,
    Directory = 1,
    Regular = 2,
}

impl FileType {
    fn from_raw(raw: u32) -> Option<FileType> {
        match raw {
            0 => Some(FileType::Rtc),
            1 => Some(FileType::Directory),
            2 => Some(FileType::Regular),
            _ => None,
        }
    }
}

/// Directory entry, decoded by value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dentry {
    pub name: [u8; NAME_LEN],
    pub file_type: FileType,
    pub inode: usize,
}

impl Dentry {
    /// Name bytes up to the first NUL (a full 32-byte name has none).
    pub fn name_bytes(&self) -> &[u8] {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LEN);
        &self.name[..len]
    }
}

/// Typed view over the raw image.
pub struct FsImage {
    data: &'static [u8],
    n_dentries: usize,
    n_inodes: usize,
    n_datablocks: usize,
}

static IMAGE: Once<FsImage> = Once::new();

/// Mount the image handed over by the boot path.
pub fn init(data: &'static [u8]) -> Result<(), KernelError> {
    let image = FsImage::new(data)?;
    IMAGE.call_once(|| image);
    Ok(())
}

/// The mounted image. Errors if the boot path never mounted one.
pub fn image() -> Result<&'static FsImage, KernelError> {
    IMAGE
        .get()
        .ok_or(KernelError::NotInitialized { subsystem: "fs" })
}

fn read_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Exact-length name comparison: a stored name shorter than 32 bytes is
/// NUL-terminated in its field, so comparing the query's NUL-padded form
/// over the full field rejects both prefixes and extensions.
fn name_matches(stored: &[u8], query: &[u8]) -> bool {
    if query.len() > NAME_LEN {
        return false;
    }
    let mut padded = [0u8; NAME_LEN];
    padded[..query.len()].copy_from_slice(query);
    stored[..NAME_LEN] == padded
}

impl FsImage {
    /// Validate the boot block against the image size.
    pub fn new(data: &'static [u8]) -> Result<FsImage, KernelError> {
        if data.len() < BLOCK_SIZE {
            return Err(KernelError::CorruptImage {
                reason: "image smaller than the boot block",
            });
        }
        let n_dentries = read_u32(data, 0).unwrap_or(0) as usize;
        let n_inodes = read_u32(data, 4).unwrap_or(0) as usize;
        let n_datablocks = read_u32(data, 8).unwrap_or(0) as usize;

        if n_dentries > MAX_DENTRIES {
            return Err(KernelError::CorruptImage {
                reason: "dentry count exceeds the boot block capacity",
            });
        }
        let needed = 1usize
            .checked_add(n_inodes)
            .and_then(|blocks| blocks.checked_add(n_datablocks))
            .and_then(|blocks| blocks.checked_mul(BLOCK_SIZE));
        match needed {
            Some(needed) if data.len() >= needed => {}
            _ => {
                return Err(KernelError::CorruptImage {
                    reason: "block counts exceed the image size",
                });
            }
        }

        Ok(FsImage {
            data,
            n_dentries,
            n_inodes,
            n_datablocks,
        })
    }

    pub fn dentry_count(&self) -> usize {
        self.n_dentries
    }

    fn dentry_at(&self, index: usize) -> Option<Dentry> {
        if index >= self.n_dentries {
            return None;
        }
        let base = DENTRY_SIZE + index * DENTRY_SIZE;
        let raw = self.data.get(base..base + DENTRY_SIZE)?;

        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&raw[..NAME_LEN]);
        let file_type = FileType::from_raw(read_u32(raw, 32)?)?;
        let inode = read_u32(raw, 36)? as usize;
        Some(Dentry {
            name,
            file_type,
            inode,
        })
    }

    /// Linear scan by name. Names longer than 32 bytes never match.
    pub fn read_dentry_by_name(&self, name: &[u8]) -> Result<Dentry, KernelError> {
        if name.is_empty() || name.len() > NAME_LEN {
            return Err(KernelError::NotFound { name: "dentry" });
        }
        (0..self.n_dentries)
            .filter_map(|i| self.dentry_at(i))
            .find(|d| name_matches(&d.name, name))
            .ok_or(KernelError::NotFound { name: "dentry" })
    }

    /// Dentry by position, bounded by the boot block's count.
    pub fn read_dentry_by_index(&self, index: usize) -> Result<Dentry, KernelError> {
        self.dentry_at(index)
            .ok_or(KernelError::NotFound { name: "dentry index" })
    }

    /// Size in bytes of the file behind `inode`.
    pub fn file_size(&self, inode: usize) -> Result<usize, KernelError> {
        if inode >= self.n_inodes {
            return Err(KernelError::NotFound { name: "inode" });
        }
        let base = (1 + inode) * BLOCK_SIZE;
        read_u32(self.data, base)
            .map(|size| size as usize)
            .ok_or(KernelError::CorruptImage {
                reason: "inode block truncated",
            })
    }

    /// Copy up to `buf.len()` bytes starting at `offset` into `buf`,
    /// stopping at end of file. Returns the number of bytes copied.
    pub fn read_data(
        &self,
        inode: usize,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<usize, KernelError> {
        let size = self.file_size(inode)?;
        if offset >= size {
            return Ok(0);
        }
        let to_copy = buf.len().min(size - offset);
        let inode_base = (1 + inode) * BLOCK_SIZE;
        let data_base = (1 + self.n_inodes) * BLOCK_SIZE;

        let mut copied = 0;
        while copied < to_copy {
            let pos = offset + copied;
            let slot = pos / BLOCK_SIZE;
            let within = pos % BLOCK_SIZE;

            if slot >= INODE_SLOTS {
                return Err(KernelError::CorruptImage {
                    reason: "file spans more blocks than an inode can index",
                });
            }
            let block_index = read_u32(self.data, inode_base + 4 + slot * 4)
                .ok_or(KernelError::CorruptImage {
                    reason: "inode block truncated",
                })? as usize;
            if block_index >= self.n_datablocks {
                return Err(KernelError::CorruptImage {
                    reason: "data block index out of range",
                });
            }

            let chunk = (BLOCK_SIZE - within).min(to_copy - copied);
            let src = data_base + block_index * BLOCK_SIZE + within;
            buf[copied..copied + chunk].copy_from_slice(&self.data[src..src + chunk]);
            copied += chunk;
        }
        Ok(copied)
    }

    /// Check the ELF magic and pull the entry point from offset 24.
    /// Returns the entry address for a valid executable.
    pub fn executable_entry(&self, inode: usize) -> Result<u32, KernelError> {
        let mut header = [0u8; 28];
        let got = self.read_data(inode, 0, &mut header)?;
        if got < header.len() || header[..4] != ELF_MAGIC {
            return Err(KernelError::NotExecutable);
        }
        read_u32(&header, ELF_ENTRY_OFFSET).ok_or(KernelError::NotExecutable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::boxed::Box;
    use std::vec;
    use std::vec::Vec;

    // -- Image builder ------------------------------------------------------

    struct ImageBuilder {
        dentries: Vec<(Vec<u8>, u32, u32)>,
        inodes: Vec<(u32, Vec<u32>)>,
        blocks: Vec<[u8; BLOCK_SIZE]>,
    }

    impl ImageBuilder {
        fn new() -> Self {
            ImageBuilder {
                dentries: Vec::new(),
                inodes: Vec::new(),
                blocks: Vec::new(),
            }
        }

        fn dentry(mut self, name: &[u8], file_type: u32, inode: u32) -> Self {
            self.dentries.push((name.to_vec(), file_type, inode));
            self
        }

        /// Add a regular file: one dentry, one inode, content spread over
        /// as many data blocks as needed.
        fn file(mut self, name: &[u8], content: &[u8]) -> Self {
            let inode = self.inodes.len() as u32;
            let mut indices = Vec::new();
            for chunk in content.chunks(BLOCK_SIZE) {
                let mut block = [0u8; BLOCK_SIZE];
                block[..chunk.len()].copy_from_slice(chunk);
                indices.push(self.blocks.len() as u32);
                self.blocks.push(block);
            }
            self.inodes.push((content.len() as u32, indices));
            self.dentry(name, 2, inode)
        }

        fn build(self) -> &'static [u8] {
            let n_blocks = 1 + self.inodes.len() + self.blocks.len();
            let mut image = vec![0u8; n_blocks * BLOCK_SIZE];

            image[0..4].copy_from_slice(&(self.dentries.len() as u32).to_le_bytes());
            image[4..8].copy_from_slice(&(self.inodes.len() as u32).to_le_bytes());
            image[8..12].copy_from_slice(&(self.blocks.len() as u32).to_le_bytes());

            for (i, (name, ftype, inode)) in self.dentries.iter().enumerate() {
                let base = DENTRY_SIZE + i * DENTRY_SIZE;
                image[base..base + name.len().min(NAME_LEN)]
                    .copy_from_slice(&name[..name.len().min(NAME_LEN)]);
                image[base + 32..base + 36].copy_from_slice(&ftype.to_le_bytes());
                image[base + 36..base + 40].copy_from_slice(&inode.to_le_bytes());
            }

            for (i, (size, indices)) in self.inodes.iter().enumerate() {
                let base = (1 + i) * BLOCK_SIZE;
                image[base..base + 4].copy_from_slice(&size.to_le_bytes());
                for (slot, index) in indices.iter().enumerate() {
                    let at = base + 4 + slot * 4;
                    image[at..at + 4].copy_from_slice(&index.to_le_bytes());
                }
            }

            let data_base = (1 + self.inodes.len()) * BLOCK_SIZE;
            for (i, block) in self.blocks.iter().enumerate() {
                let base = data_base + i * BLOCK_SIZE;
                image[base..base + BLOCK_SIZE].copy_from_slice(block);
            }

            Box::leak(image.into_boxed_slice())
        }
    }

    // -- Lookup -------------------------------------------------------------

    #[test]
    fn lookup_by_name_and_index() {
        let image = ImageBuilder::new()
            .dentry(b"rtc", 0, 0)
            .dentry(b".", 1, 0)
            .file(b"frame0.txt", b"fish")
            .build();
        let fs = FsImage::new(image).unwrap();

        let rtc = fs.read_dentry_by_name(b"rtc").unwrap();
        assert_eq!(rtc.file_type, FileType::Rtc);

        let file = fs.read_dentry_by_name(b"frame0.txt").unwrap();
        assert_eq!(file.file_type, FileType::Regular);
        assert_eq!(file.name_bytes(), b"frame0.txt");

        assert_eq!(fs.read_dentry_by_index(1).unwrap().file_type, FileType::Directory);
        assert!(fs.read_dentry_by_index(3).is_err());
    }

    #[test]
    fn name_length_boundaries() {
        let exactly32 = [b'a'; 32];
        let image = ImageBuilder::new().file(&exactly32, b"x").build();
        let fs = FsImage::new(image).unwrap();

        // 32 bytes: match.
        assert!(fs.read_dentry_by_name(&exactly32).is_ok());
        // 33 bytes: never matches.
        let too_long = [b'a'; 33];
        assert!(fs.read_dentry_by_name(&too_long).is_err());
        // A prefix of the stored name must not match.
        assert!(fs.read_dentry_by_name(&exactly32[..31]).is_err());
    }

    #[test]
    fn prefix_query_does_not_match_longer_name() {
        let image = ImageBuilder::new().file(b"shells", b"data").build();
        let fs = FsImage::new(image).unwrap();
        assert!(fs.read_dentry_by_name(b"shell").is_err());
        assert!(fs.read_dentry_by_name(b"shells").is_ok());
    }

    #[test]
    fn empty_name_is_not_found() {
        let image = ImageBuilder::new().file(b"a", b"1").build();
        let fs = FsImage::new(image).unwrap();
        assert!(fs.read_dentry_by_name(b"").is_err());
    }

    // -- read_data ----------------------------------------------------------

    #[test]
    fn read_within_one_block() {
        let image = ImageBuilder::new().file(b"f", b"hello world").build();
        let fs = FsImage::new(image).unwrap();
        let inode = fs.read_dentry_by_name(b"f").unwrap().inode;

        let mut buf = [0u8; 5];
        assert_eq!(fs.read_data(inode, 0, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(fs.read_data(inode, 6, &mut buf).unwrap(), 5);
        assert_eq!(&buf, b"world");
    }

    #[test]
    fn read_clamps_at_eof() {
        let image = ImageBuilder::new().file(b"f", b"abc").build();
        let fs = FsImage::new(image).unwrap();
        let inode = fs.read_dentry_by_name(b"f").unwrap().inode;

        let mut buf = [0u8; 16];
        assert_eq!(fs.read_data(inode, 0, &mut buf).unwrap(), 3);
        assert_eq!(fs.read_data(inode, 3, &mut buf).unwrap(), 0);
        assert_eq!(fs.read_data(inode, 100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn read_spans_block_boundary() {
        let mut content = Vec::new();
        for i in 0..(BLOCK_SIZE + 100) {
            content.push((i % 251) as u8);
        }
        let image = ImageBuilder::new().file(b"big", &content).build();
        let fs = FsImage::new(image).unwrap();
        let inode = fs.read_dentry_by_name(b"big").unwrap().inode;

        // Straddle the block boundary.
        let mut buf = [0u8; 200];
        let got = fs.read_data(inode, BLOCK_SIZE - 100, &mut buf).unwrap();
        assert_eq!(got, 200);
        assert_eq!(&buf[..], &content[BLOCK_SIZE - 100..BLOCK_SIZE + 100]);

        // Sequential reads equal one big read (file-position contract).
        let mut whole = vec![0u8; content.len()];
        assert_eq!(fs.read_data(inode, 0, &mut whole).unwrap(), content.len());
        let mut first = vec![0u8; 1000];
        let mut second = vec![0u8; content.len() - 1000];
        fs.read_data(inode, 0, &mut first).unwrap();
        fs.read_data(inode, 1000, &mut second).unwrap();
        first.extend_from_slice(&second);
        assert_eq!(first, whole);
    }

    #[test]
    fn invalid_inode_is_an_error() {
        let image = ImageBuilder::new().file(b"f", b"abc").build();
        let fs = FsImage::new(image).unwrap();
        let mut buf = [0u8; 4];
        assert!(fs.read_data(9, 0, &mut buf).is_err());
        assert!(fs.file_size(9).is_err());
    }

    // -- Executables --------------------------------------------------------

    #[test]
    fn executable_entry_point() {
        let mut program = vec![0u8; 64];
        program[..4].copy_from_slice(&ELF_MAGIC);
        program[24..28].copy_from_slice(&0x0804_8010u32.to_le_bytes());
        let image = ImageBuilder::new().file(b"shell", &program).build();
        let fs = FsImage::new(image).unwrap();
        let inode = fs.read_dentry_by_name(b"shell").unwrap().inode;
        assert_eq!(fs.executable_entry(inode).unwrap(), 0x0804_8010);
    }

    #[test]
    fn non_elf_is_rejected() {
        let image = ImageBuilder::new()
            .file(b"frame0.txt", b"just text, long enough to hold a header")
            .file(b"tiny", b"ELF")
            .build();
        let fs = FsImage::new(image).unwrap();
        let text = fs.read_dentry_by_name(b"frame0.txt").unwrap().inode;
        assert_eq!(fs.executable_entry(text), Err(KernelError::NotExecutable));
        let tiny = fs.read_dentry_by_name(b"tiny").unwrap().inode;
        assert_eq!(fs.executable_entry(tiny), Err(KernelError::NotExecutable));
    }

    // -- Mount validation ---------------------------------------------------

    #[test]
    fn truncated_image_fails_validation() {
        let image: &'static [u8] = Box::leak(vec![0u8; 100].into_boxed_slice());
        assert!(FsImage::new(image).is_err());

        // Counts that promise more blocks than the image holds.
        let mut raw = vec![0u8; BLOCK_SIZE];
        raw[4..8].copy_from_slice(&10u32.to_le_bytes());
        let image: &'static [u8] = Box::leak(raw.into_boxed_slice());
        assert!(FsImage::new(image).is_err());
    }
}
