//! Kernel image loading.
//!
//! Two loaders: a flat raw-binary loader for a pre-linked kernel image,
//! and a full ELF loader that walks every `PT_LOAD` segment.

use std::path::Path;

use elf::abi::PT_LOAD;
use elf::endian::AnyEndian;
use elf::ElfBytes;
use rv32ima_core::memory::GuestMemory;
use tracing::debug;

use crate::error::HostError;

/// Copy the whole file at `path` into `ram` starting at `offset` bytes
/// from `ram`'s base. The conventional case: a pre-linked flat kernel
/// binary, as the reference engine itself expects.
///
/// Returns the offset just past the loaded bytes, so the host can place
/// a device-tree blob after it.
pub fn load_raw_image(path: &Path, ram: &mut GuestMemory, offset: u32) -> Result<u32, HostError> {
    let bytes = std::fs::read(path).map_err(|source| HostError::UnreadableImage {
        path: path.to_path_buf(),
        source,
    })?;
    check_fits(path, bytes.len(), ram, offset)?;
    ram.load_bytes_at(offset, &bytes);
    debug!(path = %path.display(), bytes = bytes.len(), offset, "loaded raw image");
    Ok(offset + bytes.len() as u32)
}

/// Parse every loadable segment out of the ELF file at `path` with the
/// `elf` crate and copy each into `ram` at `segment.vaddr - base`.
/// Returns the ELF entry point (so the host can set the initial `pc`
/// instead of assuming it equals `base`) and the offset just past the
/// highest loaded byte.
pub fn load_elf_image(path: &Path, ram: &mut GuestMemory, base: u32) -> Result<(u32, u32), HostError> {
    let bytes = std::fs::read(path).map_err(|source| HostError::UnreadableImage {
        path: path.to_path_buf(),
        source,
    })?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(&bytes).map_err(|source| {
        HostError::MalformedElf {
            path: path.to_path_buf(),
            source,
        }
    })?;

    let segments = file
        .segments()
        .ok_or_else(|| HostError::NoLoadableSegments {
            path: path.to_path_buf(),
        })?;

    let mut loaded_any = false;
    let mut end_offset = 0u32;
    for segment in segments.iter().filter(|s| s.p_type == PT_LOAD) {
        let vaddr = segment.p_vaddr as u32;
        let offset = vaddr.wrapping_sub(base);
        let data = file
            .segment_data(&segment)
            .map_err(|source| HostError::MalformedElf {
                path: path.to_path_buf(),
                source,
            })?;
        check_fits(path, data.len(), ram, offset)?;
        ram.load_bytes_at(offset, data);
        loaded_any = true;
        end_offset = end_offset.max(offset + data.len() as u32);
        debug!(vaddr, file_size = data.len(), mem_size = segment.p_memsz, "loaded PT_LOAD segment");
    }

    if !loaded_any {
        return Err(HostError::NoLoadableSegments {
            path: path.to_path_buf(),
        });
    }

    Ok((file.ehdr.e_entry as u32, end_offset))
}

/// Place the blob at `path` immediately after `kernel_end`, 4-KiB
/// aligned, and return its load offset.
pub fn load_dtb(path: &Path, ram: &mut GuestMemory, kernel_end: u32) -> Result<u32, HostError> {
    let bytes = std::fs::read(path).map_err(|source| HostError::UnreadableImage {
        path: path.to_path_buf(),
        source,
    })?;
    let offset = (kernel_end + 0xfff) & !0xfff;
    check_fits(path, bytes.len(), ram, offset)?;
    ram.load_bytes_at(offset, &bytes);
    Ok(offset)
}

fn check_fits(path: &Path, size: usize, ram: &GuestMemory, offset: u32) -> Result<(), HostError> {
    let end = offset as u64 + size as u64;
    if end > ram.size() as u64 {
        return Err(HostError::ImageTooLarge {
            path: path.to_path_buf(),
            size,
            ram_size: ram.size(),
            offset,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_file_with(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn load_raw_image_copies_bytes_at_offset() {
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        let file = temp_file_with(&[1, 2, 3, 4]);

        let end = load_raw_image(file.path(), &mut ram, 0x10).unwrap();
        assert_eq!(end, 0x14);
        assert_eq!(&ram.as_slice()[0x10..0x14], &[1, 2, 3, 4]);
    }

    #[test]
    fn load_raw_image_rejects_image_too_large_for_ram() {
        let mut ram = GuestMemory::new(0x8000_0000, 4).unwrap();
        let file = temp_file_with(&[0u8; 16]);

        let err = load_raw_image(file.path(), &mut ram, 0).unwrap_err();
        assert!(matches!(err, HostError::ImageTooLarge { .. }));
    }

    #[test]
    fn load_dtb_aligns_to_next_4kib_boundary() {
        let mut ram = GuestMemory::new(0x8000_0000, 0x10000).unwrap();
        let file = temp_file_with(&[0xaa, 0xbb]);

        let offset = load_dtb(file.path(), &mut ram, 0x123).unwrap();
        assert_eq!(offset, 0x1000);
        assert_eq!(&ram.as_slice()[0x1000..0x1002], &[0xaa, 0xbb]);
    }

    #[test]
    fn unreadable_image_reports_host_error() {
        let mut ram = GuestMemory::new(0x8000_0000, 4096).unwrap();
        let err = load_raw_image(Path::new("/nonexistent/kernel.bin"), &mut ram, 0).unwrap_err();
        assert!(matches!(err, HostError::UnreadableImage { .. }));
    }
}
