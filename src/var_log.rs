//! Circular log for variable-length "blob" data, addressed by a 32-bit
//! wrap-aware byte offset rather than the logical-page-id scheme
//! [`crate::circular_log::CircularLog`] uses for the data and index
//! streams.
//!
//! A var record is a `u32` length header followed by that many payload
//! bytes, and may straddle a page boundary. Each page additionally
//! reserves its first `key_size` bytes for the largest key whose blob has
//! touched that page so far, re-stamped on every write that lands in it;
//! once that page is reclaimed, the stamp it carried becomes
//! `min_var_record_id` and any key at or below it is stale. Reclamation
//! erases one page at a time as the writer catches up to it, rather than
//! reasoning about logical ids or erase blocks.

use crate::device::BlockDevice;
use crate::error::Result;

/// State for the variable-data circular log.
#[derive(Debug, Clone)]
pub struct VarLog {
    region_start_page: u32,
    capacity_pages: u32,
    page_size: u32,
    key_size: u32,
    next_page_index: u64,
    cursor_in_page: u32,
    min_page_index: u64,
    min_var_record_id: Option<Vec<u8>>,
}

impl VarLog {
    pub fn new(region_start_page: u32, capacity_pages: u32, page_size: u32, key_size: u32) -> Self {
        Self {
            region_start_page,
            capacity_pages,
            page_size,
            key_size,
            next_page_index: 0,
            cursor_in_page: 0,
            min_page_index: 0,
            min_var_record_id: None,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn from_state(
        region_start_page: u32,
        capacity_pages: u32,
        page_size: u32,
        key_size: u32,
        next_page_index: u64,
        cursor_in_page: u32,
        min_page_index: u64,
        min_var_record_id: Option<Vec<u8>>,
    ) -> Self {
        Self {
            region_start_page,
            capacity_pages,
            page_size,
            key_size,
            next_page_index,
            cursor_in_page,
            min_page_index,
            min_var_record_id,
        }
    }

    pub fn next_page_index(&self) -> u64 {
        self.next_page_index
    }

    pub fn cursor_in_page(&self) -> u32 {
        self.cursor_in_page
    }

    pub fn min_page_index(&self) -> u64 {
        self.min_page_index
    }

    /// Largest key below (and including) which a blob is guaranteed to have
    /// been reclaimed. `None` means nothing has been reclaimed yet.
    pub fn min_var_record_id(&self) -> Option<&[u8]> {
        self.min_var_record_id.as_deref()
    }

    fn physical_page(&self, page_index: u64) -> u32 {
        self.region_start_page + (page_index % self.capacity_pages as u64) as u32
    }

    pub fn current_byte_position(&self) -> u64 {
        self.next_page_index * self.page_size as u64 + self.cursor_in_page as u64
    }

    /// Recover the full 64-bit byte position a wrap-truncated `u32` offset
    /// refers to, on the assumption it was written before the current
    /// cursor position and the stream hasn't wrapped more than once around
    /// the 32-bit space since.
    pub fn reconstruct_offset(&self, offset: u32) -> u64 {
        let cursor = self.current_byte_position();
        let high_bits = cursor & !(u32::MAX as u64);
        let mut candidate = high_bits | offset as u64;
        if candidate > cursor {
            candidate = candidate.saturating_sub(1u64 << 32);
        }
        candidate
    }

    /// Reclaim the oldest page if the write cursor is about to re-enter it,
    /// recording its key header as the new `min_var_record_id` first —
    /// everything that page's header covers is about to be destroyed.
    fn reclaim_before_write<D: BlockDevice>(&mut self, device: &mut D) -> Result<()> {
        if self.next_page_index - self.min_page_index >= self.capacity_pages as u64 {
            let physical = self.physical_page(self.min_page_index);
            let mut buf = vec![0u8; self.page_size as usize];
            device.read_page(physical, &mut buf)?;
            self.min_var_record_id = Some(buf[..self.key_size as usize].to_vec());
            device.erase(physical, 1)?;
            self.min_page_index += 1;
        }
        Ok(())
    }

    fn write_bytes<D: BlockDevice>(&mut self, device: &mut D, staging: &mut [u8], key: &[u8], mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            if self.cursor_in_page == 0 {
                self.reclaim_before_write(device)?;
                staging.fill(0);
                self.cursor_in_page = self.key_size;
            }
            // Re-stamp the page's key header on every write that touches
            // it, not just when it's begun: keys are non-decreasing, so by
            // the time this page is actually flushed its header holds the
            // largest key that ever landed on it.
            staging[..self.key_size as usize].copy_from_slice(key);

            let space = self.page_size as usize - self.cursor_in_page as usize;
            let take = space.min(bytes.len());
            let start = self.cursor_in_page as usize;
            staging[start..start + take].copy_from_slice(&bytes[..take]);
            self.cursor_in_page += take as u32;
            bytes = &bytes[take..];

            if self.cursor_in_page as usize == self.page_size as usize {
                let physical = self.physical_page(self.next_page_index);
                device.write_page(physical, staging)?;
                self.next_page_index += 1;
                self.cursor_in_page = 0;
            }
        }
        Ok(())
    }

    /// Append a length-prefixed blob, flushing full pages as they fill.
    /// Returns the wrap-aware offset callers should store alongside the
    /// owning record. If fewer than 4 bytes remain in the active page, it
    /// is rotated before the length header is written, so that header is
    /// never split across a page boundary.
    pub fn append<D: BlockDevice>(&mut self, device: &mut D, staging: &mut [u8], key: &[u8], data: &[u8]) -> Result<u32> {
        if self.cursor_in_page != 0 && self.page_size - self.cursor_in_page < 4 {
            let physical = self.physical_page(self.next_page_index);
            device.write_page(physical, staging)?;
            self.next_page_index += 1;
            self.cursor_in_page = 0;
        }

        let start = self.current_byte_position() as u32;
        let len_header = (data.len() as u32).to_le_bytes();
        self.write_bytes(device, staging, key, &len_header)?;
        self.write_bytes(device, staging, key, data)?;
        Ok(start)
    }

    /// Persist whatever has been staged into the current (not yet full)
    /// page, so it survives a close/reopen.
    pub fn flush<D: BlockDevice>(&mut self, device: &mut D, staging: &[u8]) -> Result<()> {
        if self.cursor_in_page > 0 {
            let physical = self.physical_page(self.next_page_index);
            device.write_page(physical, staging)?;
        }
        Ok(())
    }

    /// Load the partially written active page back into `staging` after
    /// recovery, so subsequent appends continue from the right byte within
    /// it instead of from a zeroed buffer.
    pub fn load_active_page<D: BlockDevice>(&self, device: &mut D, staging: &mut [u8]) -> Result<()> {
        if self.cursor_in_page > 0 {
            let physical = self.physical_page(self.next_page_index);
            device.read_page(physical, staging)?;
        }
        Ok(())
    }

    fn read_bytes<D: BlockDevice>(&self, device: &mut D, mut pos: u64, out: &mut [u8]) -> Result<()> {
        let mut written = 0usize;
        let mut page_buf = vec![0u8; self.page_size as usize];
        while written < out.len() {
            let page_index = pos / self.page_size as u64;
            let in_page = (pos % self.page_size as u64) as usize;
            let physical = self.physical_page(page_index);
            device.read_page(physical, &mut page_buf)?;
            let take = (self.page_size as usize - in_page).min(out.len() - written);
            out[written..written + take].copy_from_slice(&page_buf[in_page..in_page + take]);
            written += take;
            pos += take as u64;
        }
        Ok(())
    }

    /// Read back the blob written at `offset`. Callers must compare the
    /// owning record's key against [`Self::min_var_record_id`] first —
    /// `VarLog` has no key-comparison semantics of its own and will happily
    /// hand back whatever bytes currently sit at `offset`, stale or not.
    pub fn read<D: BlockDevice>(&self, device: &mut D, offset: u32) -> Result<Vec<u8>> {
        let start = self.reconstruct_offset(offset);
        let mut len_buf = [0u8; 4];
        self.read_bytes(device, start, &mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut data = vec![0u8; len];
        self.read_bytes(device, start + 4, &mut data)?;
        Ok(data)
    }

    /// Reconstruct a var stream's bookkeeping by scanning every physical
    /// page's key header.
    ///
    /// Unlike [`crate::circular_log::CircularLog::recover_by_scan`], a var
    /// page carries no logical id to detect a wrap from — only the
    /// monotone key header, which a fully-wrapped scan can no longer place
    /// in write order once every page has been touched. The not-yet-wrapped
    /// case (by far the common one: a var region sized for the workload
    /// rarely needs a manifest) is recovered exactly, page for page. Once
    /// the whole region has wrapped, this conservatively resumes writing at
    /// the start of the region and treats the largest key seen anywhere as
    /// the reclaim watermark, so every already-written blob reads as stale
    /// rather than risk handing back a blob whose page has actually been
    /// overwritten. A manifest is the only way to recover var blobs across
    /// a full wrap without losing them.
    pub fn recover_by_scan<D: BlockDevice>(
        device: &mut D,
        region_start_page: u32,
        capacity_pages: u32,
        page_size: u32,
        key_size: u32,
    ) -> Result<Self> {
        let mut buf = vec![0u8; page_size as usize];
        let mut max_key: Option<Vec<u8>> = None;
        let mut seam = None;
        for offset in 0..capacity_pages {
            device.read_page(region_start_page + offset, &mut buf)?;
            let header = &buf[..key_size as usize];
            if header.iter().all(|&b| b == 0xFF) {
                if seam.is_none() {
                    seam = Some(offset);
                }
            } else {
                max_key = Some(header.to_vec());
            }
        }

        match seam {
            Some(seam) => Ok(Self::from_state(
                region_start_page,
                capacity_pages,
                page_size,
                key_size,
                seam as u64,
                0,
                0,
                None,
            )),
            None if max_key.is_none() => Ok(Self::new(region_start_page, capacity_pages, page_size, key_size)),
            None => Ok(Self::from_state(
                region_start_page,
                capacity_pages,
                page_size,
                key_size,
                capacity_pages as u64,
                0,
                0,
                max_key,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryBlockDevice;

    #[test]
    fn append_and_read_small_blob() {
        let mut device = MemoryBlockDevice::new(16, 8);
        let mut log = VarLog::new(0, 8, 16, 4);
        let mut staging = vec![0u8; 16];

        let offset = log.append(&mut device, &mut staging, &1u32.to_le_bytes(), b"hi").unwrap();
        log.flush(&mut device, &staging).unwrap();

        let read_back = log.read(&mut device, offset).unwrap();
        assert_eq!(read_back, b"hi");
    }

    #[test]
    fn blob_spanning_pages_round_trips() {
        let mut device = MemoryBlockDevice::new(8, 16);
        let mut log = VarLog::new(0, 16, 8, 4);
        let mut staging = vec![0u8; 8];

        let payload: Vec<u8> = (0..40u8).collect();
        let offset = log.append(&mut device, &mut staging, &1u32.to_le_bytes(), &payload).unwrap();
        log.flush(&mut device, &staging).unwrap();

        let read_back = log.read(&mut device, offset).unwrap();
        assert_eq!(read_back, payload);
    }

    #[test]
    fn reclaimed_page_sets_min_var_record_id() {
        let mut device = MemoryBlockDevice::new(8, 4);
        let mut log = VarLog::new(0, 4, 8, 4);
        let mut staging = vec![0u8; 8];

        assert!(log.min_var_record_id().is_none());

        // Every page holds exactly one 1-byte blob (4-byte header reserved
        // for the key, 4-byte length header leaves no room for payload plus
        // header, so each append rotates to a fresh page).
        let mut last_key = 0u32;
        for k in 0..12u32 {
            log.append(&mut device, &mut staging, &k.to_le_bytes(), &[k as u8]).unwrap();
            last_key = k;
        }
        log.flush(&mut device, &staging).unwrap();
        let _ = last_key;

        let min_id = log.min_var_record_id().expect("wrapped past the first page by now");
        let min_id = u32::from_le_bytes(min_id.try_into().unwrap());
        // The reclaimed pages' headers were stamped with the last key
        // written into them, so the watermark tracks a few keys behind the
        // write cursor rather than the very first one.
        assert!(min_id < 11);
    }

    #[test]
    fn recover_by_scan_before_wrap_matches_live_state() {
        let mut device = MemoryBlockDevice::new(16, 8);
        let mut log = VarLog::new(0, 8, 16, 4);
        let mut staging = vec![0u8; 16];
        for k in 0..3u32 {
            log.append(&mut device, &mut staging, &k.to_le_bytes(), b"hi").unwrap();
        }
        log.flush(&mut device, &staging).unwrap();

        let recovered = VarLog::recover_by_scan(&mut device, 0, 8, 16, 4).unwrap();
        assert_eq!(recovered.next_page_index(), log.next_page_index());
        assert_eq!(recovered.min_page_index(), log.min_page_index());
        assert!(recovered.min_var_record_id().is_none());
    }

    #[test]
    fn recover_by_scan_handles_never_written() {
        let mut device = MemoryBlockDevice::new(16, 8);
        let recovered = VarLog::recover_by_scan(&mut device, 0, 8, 16, 4).unwrap();
        assert_eq!(recovered.next_page_index(), 0);
        assert!(recovered.min_var_record_id().is_none());
    }
}
