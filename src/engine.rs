//! The SBITS engine: orchestrates the data stream, the optional index
//! stream, the optional variable-data stream, and the learned index on top
//! of them.
//!
//! Keys must be inserted in strictly increasing order (spec.md's
//! append-only time-series model). A data page accumulates records until
//! full, at which point it is written out, its aggregate bitmap becomes one
//! entry in the current index page, and its minimum key becomes one knot
//! fed into the spline.

use std::cmp::Ordering;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use crate::buffer_pool::{BufferPool, SlotRole};
use crate::circular_log::CircularLog;
use crate::config::{ParamFlags, StorageConfig};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::iterator::{RangeFilter, RangeIter};
use crate::manifest::Manifest;
use crate::page::{
    DataPageLayout, DataPageView, DataPageViewMut, IndexPageLayout, IndexPageView, IndexPageViewMut,
};
use crate::radix::{LearnedIndex, RadixTable};
use crate::record_ops::RecordOps;
use crate::spline::Spline;
use crate::stats::Stats;
use crate::var_log::VarLog;

fn page_region(start_address: u64, end_address: u64, page_size: u32) -> (u32, u32) {
    let start = (start_address / page_size as u64) as u32;
    let capacity = ((end_address - start_address) / page_size as u64) as u32;
    (start, capacity)
}

pub struct Engine<D: BlockDevice, R: RecordOps> {
    device: D,
    record_ops: R,
    config: StorageConfig,
    data_layout: DataPageLayout,
    index_layout: IndexPageLayout,

    data_log: CircularLog,
    index_log: Option<CircularLog>,
    var_log: Option<VarLog>,

    pool: BufferPool,
    index: Option<LearnedIndex>,

    data_page_active: bool,
    data_page_logical_id: u32,
    data_page_physical: u32,

    index_page_active: bool,
    index_page_physical: u32,

    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,

    stats: Stats,
    manifest_path: Option<PathBuf>,
}

impl<D: BlockDevice, R: RecordOps> Engine<D, R> {
    pub fn init(mut device: D, record_ops: R, config: StorageConfig, manifest_path: Option<PathBuf>) -> Result<Self> {
        config.validate()?;

        let data_layout = DataPageLayout::new(&config);
        let index_layout = IndexPageLayout::new(&config);
        let (data_start, data_capacity) = page_region(config.start_address, config.end_address, config.page_size);

        let using_index = config.parameters.contains(ParamFlags::USE_INDEX);
        let using_var = config.parameters.contains(ParamFlags::USE_VDATA);

        let manifest = manifest_path
            .as_ref()
            .and_then(|path| Manifest::load(path).ok())
            .filter(|m| m.config.page_size == config.page_size && m.config.key_size == config.key_size);

        let data_log = match &manifest {
            Some(m) => {
                info!(pages = data_capacity, "resuming data stream from manifest");
                m.data_log(data_start, data_capacity)
            }
            None => {
                info!(pages = data_capacity, "recovering data stream by physical scan");
                CircularLog::recover_by_scan(&mut device, data_start, data_capacity, config.erase_size_in_pages, config.page_size, |buf| {
                    u32::from_le_bytes(buf[0..4].try_into().unwrap())
                })?
            }
        };

        let index_log = if using_index {
            let (start, capacity) = page_region(config.index_address_start, config.index_address_end, config.page_size);
            Some(match &manifest {
                Some(m) => m.index_log(start, capacity),
                None => CircularLog::recover_by_scan(&mut device, start, capacity, config.erase_size_in_pages, config.page_size, |buf| {
                    u32::from_le_bytes(buf[0..4].try_into().unwrap())
                })?,
            })
        } else {
            None
        };

        let var_log = if using_var {
            let (start, capacity) = page_region(config.var_address_start, config.var_address_end, config.page_size);
            Some(match &manifest {
                Some(m) => m.var_log(start, capacity, config.page_size),
                None => {
                    info!(pages = capacity, "recovering var stream by physical scan");
                    VarLog::recover_by_scan(&mut device, start, capacity, config.page_size, config.key_size)?
                }
            })
        } else {
            None
        };

        let min_key = match &manifest {
            Some(m) => m.min_key.clone(),
            None => {
                if data_log.is_empty() {
                    None
                } else {
                    let physical = data_log
                        .logical_to_physical(data_log.first_logical_page_id())
                        .expect("first logical page must be live");
                    let mut buf = vec![0u8; config.page_size as usize];
                    device.read_page(physical, &mut buf)?;
                    Some(DataPageView::new(&buf, &data_layout).min_key().to_vec())
                }
            }
        };

        let last_key = if data_log.is_empty() {
            None
        } else {
            let physical = data_log
                .logical_to_physical(data_log.next_logical_id() - 1)
                .expect("last written page must be live");
            let mut buf = vec![0u8; config.page_size as usize];
            device.read_page(physical, &mut buf)?;
            Some(DataPageView::new(&buf, &data_layout).max_key().to_vec())
        };

        let mut index = if using_index {
            let spline = Spline::new(data_capacity as usize, config.index_max_error);
            Some(if config.radix_bits > 0 {
                LearnedIndex::RadixSpline(spline, RadixTable::build(&[], config.radix_bits))
            } else {
                LearnedIndex::Spline(spline)
            })
        } else {
            None
        };

        if let Some(index) = &mut index {
            if !data_log.is_empty() {
                rebuild_index_from_data(
                    &mut device,
                    &data_log,
                    &data_layout,
                    config.page_size,
                    &record_ops,
                    index,
                    config.radix_bits,
                )?;
            }
        }

        let pool = BufferPool::new(&config);

        Ok(Self {
            device,
            record_ops,
            config,
            data_layout,
            index_layout,
            data_log,
            index_log,
            var_log,
            pool,
            index,
            data_page_active: false,
            data_page_logical_id: 0,
            data_page_physical: 0,
            index_page_active: false,
            index_page_physical: 0,
            min_key,
            last_key,
            stats: Stats::default(),
            manifest_path,
        })
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn min_key(&self) -> Option<&[u8]> {
        self.min_key.as_deref()
    }

    /// Has the data stream's write cursor wrapped at least once, i.e. has
    /// the oldest erase block already been reclaimed?
    pub fn is_data_wrapped(&self) -> bool {
        self.data_log.wrapped()
    }

    /// Oldest logical page id still live in the data stream.
    pub fn first_logical_page_id(&self) -> u32 {
        self.data_log.first_logical_page_id()
    }

    fn ensure_data_write_page(&mut self) -> Result<()> {
        if self.data_page_active {
            let count = DataPageView::new(self.pool.slot(SlotRole::DataWrite), &self.data_layout).count();
            if (count as usize) < self.data_layout.max_records_per_page {
                return Ok(());
            }
            self.flush_data_page()?;
        }

        let (logical_id, physical, reclaimed) = self.data_log.begin_write(&mut self.device)?;
        {
            let mut view = DataPageViewMut::new(self.pool.slot_mut(SlotRole::DataWrite), &self.data_layout);
            view.init_empty();
            view.set_logical_id(logical_id);
        }
        self.data_page_logical_id = logical_id;
        self.data_page_physical = physical;
        self.data_page_active = true;

        if let Some(new_first) = reclaimed {
            debug!(new_first_logical_page_id = new_first, "reclaimed oldest data erase block");
            let physical = self
                .data_log
                .logical_to_physical(new_first)
                .expect("just-reclaimed boundary must be live");
            let mut buf = vec![0u8; self.config.page_size as usize];
            self.device.read_page(physical, &mut buf)?;
            self.min_key = Some(DataPageView::new(&buf, &self.data_layout).min_key().to_vec());
        }
        Ok(())
    }

    fn flush_data_page(&mut self) -> Result<()> {
        if !self.data_page_active {
            return Ok(());
        }
        let logical_id = self.data_page_logical_id;
        let physical = self.data_page_physical;

        let (min_key, bitmap) = {
            let view = DataPageView::new(self.pool.slot(SlotRole::DataWrite), &self.data_layout);
            (view.min_key().to_vec(), view.bitmap().to_vec())
        };

        self.device.write_page(physical, self.pool.slot(SlotRole::DataWrite))?;
        self.data_log.commit_write();
        self.data_page_active = false;
        self.stats.record_data_write();

        if let Some(index) = &mut self.index {
            let key_u64 = self.record_ops.key_to_u64(&min_key);
            index.spline_mut().add(key_u64, logical_id)?;
            index.rebuild_radix(self.config.radix_bits);
        }

        if self.config.parameters.contains(ParamFlags::USE_BMAP) && self.index_log.is_some() {
            self.append_index_bitmap(&bitmap)?;
        }

        Ok(())
    }

    fn ensure_index_write_page(&mut self) -> Result<()> {
        if self.index_page_active {
            let count = IndexPageView::new(self.pool.slot(SlotRole::IndexWrite), &self.index_layout).count();
            if (count as usize) < self.index_layout.max_records_per_page {
                return Ok(());
            }
            self.flush_index_page()?;
        }
        let log = self.index_log.as_mut().expect("index stream must be configured");
        let (logical_id, physical, _reclaimed) = log.begin_write(&mut self.device)?;
        {
            let mut view = IndexPageViewMut::new(self.pool.slot_mut(SlotRole::IndexWrite), &self.index_layout);
            view.init_empty(self.data_page_logical_id);
            view.set_logical_id(logical_id);
        }
        self.index_page_physical = physical;
        self.index_page_active = true;
        Ok(())
    }

    fn flush_index_page(&mut self) -> Result<()> {
        if !self.index_page_active {
            return Ok(());
        }
        let physical = self.index_page_physical;
        self.device.write_page(physical, self.pool.slot(SlotRole::IndexWrite))?;
        self.index_log.as_mut().expect("checked by caller").commit_write();
        self.index_page_active = false;
        self.stats.record_idx_write();
        Ok(())
    }

    fn append_index_bitmap(&mut self, bitmap: &[u8]) -> Result<()> {
        self.ensure_index_write_page()?;
        {
            let mut view = IndexPageViewMut::new(self.pool.slot_mut(SlotRole::IndexWrite), &self.index_layout);
            view.append_bitmap(bitmap);
        }
        let count = IndexPageView::new(self.pool.slot(SlotRole::IndexWrite), &self.index_layout).count();
        if count as usize >= self.index_layout.max_records_per_page {
            self.flush_index_page()?;
        }
        Ok(())
    }

    fn check_key_size(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.data_layout.key_size {
            return Err(Error::Format(format!(
                "key is {} bytes, expected {}",
                key.len(),
                self.data_layout.key_size
            )));
        }
        Ok(())
    }

    fn check_data_size(&self, data: &[u8]) -> Result<()> {
        if data.len() != self.data_layout.data_size {
            return Err(Error::Format(format!(
                "data is {} bytes, expected {}",
                data.len(),
                self.data_layout.data_size
            )));
        }
        Ok(())
    }

    fn check_monotonic(&self, key: &[u8]) -> Result<()> {
        if let Some(last) = &self.last_key {
            if self.record_ops.compare_key(key, last) == Ordering::Less {
                return Err(Error::Format("keys must be inserted in non-decreasing order".into()));
            }
        }
        Ok(())
    }

    fn put_record(&mut self, key: &[u8], data: &[u8], var_offset: Option<u32>) -> Result<()> {
        self.check_key_size(key)?;
        self.check_data_size(data)?;
        self.check_monotonic(key)?;

        self.ensure_data_write_page()?;

        {
            let mut view = DataPageViewMut::new(self.pool.slot_mut(SlotRole::DataWrite), &self.data_layout);
            let is_first_in_page = view.count() == 0;
            view.append_record(key, data, var_offset);
            if self.config.parameters.contains(ParamFlags::USE_MAX_MIN) {
                if is_first_in_page {
                    view.set_min_key(key);
                    view.set_min_data(data);
                }
                view.set_max_key(key);
                let current_max_data = view.max_data().to_vec();
                if self.record_ops.compare_data(data, &current_max_data) == Ordering::Greater || is_first_in_page {
                    view.set_max_data(data);
                }
            }
            if self.config.parameters.contains(ParamFlags::USE_BMAP) {
                let mut bitmap = view.bitmap_mut().to_vec();
                self.record_ops.update_bitmap(data, &mut bitmap);
                view.bitmap_mut().copy_from_slice(&bitmap);
            }
        }

        if self.min_key.is_none() {
            self.min_key = Some(key.to_vec());
        }
        self.last_key = Some(key.to_vec());
        trace!(?var_offset, "appended record");
        Ok(())
    }

    pub fn put(&mut self, key: &[u8], data: &[u8]) -> Result<()> {
        self.put_record(key, data, None)
    }

    pub fn put_var(&mut self, key: &[u8], data: &[u8], blob: &[u8]) -> Result<()> {
        if !self.config.parameters.contains(ParamFlags::USE_VDATA) {
            return Err(Error::Config("variable data is not enabled for this store".into()));
        }
        let offset = {
            let var_log = self.var_log.as_mut().expect("checked above");
            var_log.append(&mut self.device, self.pool.slot_mut(SlotRole::VarWrite), key, blob)?
        };
        self.put_record(key, data, Some(offset))
    }

    fn load_data_page(&mut self, logical_id: u32, role: SlotRole) -> Result<()> {
        if self.pool.cached_logical_id(role) == Some(logical_id) {
            self.stats.record_buffer_hit();
            return Ok(());
        }
        let physical = self.data_log.logical_to_physical(logical_id).ok_or(Error::NotFound)?;
        self.device.read_page(physical, self.pool.slot_mut(role))?;
        self.pool.mark_cached(role, logical_id);
        self.stats.record_data_read();
        Ok(())
    }

    /// Binary-search the live page range `[lo, hi]` for the page whose
    /// `[min_key, max_key]` envelope contains `key`.
    fn find_page_for_key(&mut self, key: &[u8], lo: u32, hi: u32) -> Result<Option<u32>> {
        let mut lo = lo as i64;
        let mut hi = hi as i64;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            self.load_data_page(mid as u32, SlotRole::DataRead)?;
            let view = DataPageView::new(self.pool.slot(SlotRole::DataRead), &self.data_layout);
            if self.record_ops.compare_key(key, view.min_key()) == Ordering::Less {
                hi = mid - 1;
            } else if self.record_ops.compare_key(key, view.max_key()) == Ordering::Greater {
                lo = mid + 1;
            } else {
                return Ok(Some(mid as u32));
            }
        }
        Ok(None)
    }

    fn search_candidate_range(&mut self, key: &[u8]) -> (u32, u32) {
        let first = self.data_log.first_logical_page_id();
        let last = self.data_log.next_logical_id().saturating_sub(1);
        if let Some(index) = &self.index {
            let key_u64 = self.record_ops.key_to_u64(key);
            if let Some((_, lo, hi)) = index.find(key_u64) {
                self.stats.observe_error(hi.saturating_sub(lo));
                return (lo.max(first), hi.min(last));
            }
        }
        (first, last)
    }

    /// Binary-search a single page buffer for `key`, returning its record
    /// index. The first probe is the position a straight-line fit through
    /// the page's first and last key would predict for `key`, rather than
    /// the midpoint — a page of monotonic keys is close enough to linear
    /// that this usually lands within a probe or two of the answer. Falls
    /// back to a plain midpoint when the estimate lands outside the page.
    fn search_in_page(&self, buf: &[u8], key: &[u8]) -> Option<usize> {
        let view = DataPageView::new(buf, &self.data_layout);
        let count = view.count() as i64;
        let mut a = 0i64;
        let mut b = count - 1;

        if count > 1 {
            let min_key = self.record_ops.key_to_u64(view.record_key(0));
            let max_key = self.record_ops.key_to_u64(view.record_key((count - 1) as usize));
            if max_key > min_key {
                let this_key = self.record_ops.key_to_u64(key);
                let slope = (max_key - min_key) as f64 / (count - 1) as f64;
                let estimate = (this_key.saturating_sub(min_key) as f64 / slope).round() as i64;
                if (0..count).contains(&estimate) {
                    match self.record_ops.compare_key(key, view.record_key(estimate as usize)) {
                        Ordering::Equal => return Some(estimate as usize),
                        Ordering::Less => b = estimate - 1,
                        Ordering::Greater => a = estimate + 1,
                    }
                }
            }
        }

        while a <= b {
            let m = a + (b - a) / 2;
            match self.record_ops.compare_key(key, view.record_key(m as usize)) {
                Ordering::Equal => return Some(m as usize),
                Ordering::Less => b = m - 1,
                Ordering::Greater => a = m + 1,
            }
        }
        None
    }

    /// `Err(Error::NotFound)` if `key` was never inserted, mirroring the
    /// reference implementation's `-1` return (spec.md §6/§8). The active,
    /// not-yet-flushed write page is consulted before falling through to the
    /// circular log, so a `get` right after a `put` sees its own write.
    pub fn get(&mut self, key: &[u8]) -> Result<Vec<u8>> {
        self.check_key_size(key)?;

        if self.data_page_active {
            if let Some(idx) = self.search_in_page(self.pool.slot(SlotRole::DataWrite), key) {
                let view = DataPageView::new(self.pool.slot(SlotRole::DataWrite), &self.data_layout);
                return Ok(view.record_data(idx).to_vec());
            }
        }

        if self.data_log.is_empty() {
            return Err(Error::NotFound);
        }
        let (lo, hi) = self.search_candidate_range(key);
        let Some(page) = self.find_page_for_key(key, lo, hi)? else {
            trace!("key not found: page envelope search exhausted");
            return Err(Error::NotFound);
        };
        self.load_data_page(page, SlotRole::DataRead)?;
        let idx = self
            .search_in_page(self.pool.slot(SlotRole::DataRead), key)
            .ok_or(Error::NotFound)?;
        let view = DataPageView::new(self.pool.slot(SlotRole::DataRead), &self.data_layout);
        Ok(view.record_data(idx).to_vec())
    }

    /// `Err(Error::NotFound)` if `key` was never inserted; `Ok(None)` if the
    /// record exists but carries no variable payload (the
    /// [`crate::page::NO_VAR_DATA`] sentinel); `Err(Error::Stale)` if the
    /// blob has since been reclaimed by var-stream wrap.
    pub fn get_var(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if !self.config.parameters.contains(ParamFlags::USE_VDATA) {
            return Err(Error::Config("variable data is not enabled for this store".into()));
        }
        self.check_key_size(key)?;

        let in_write_slot = if self.data_page_active {
            self.search_in_page(self.pool.slot(SlotRole::DataWrite), key).map(|idx| {
                let view = DataPageView::new(self.pool.slot(SlotRole::DataWrite), &self.data_layout);
                (view.record_data(idx).to_vec(), view.record_var_offset(idx))
            })
        } else {
            None
        };

        let (data, var_offset) = match in_write_slot {
            Some(v) => v,
            None => {
                if self.data_log.is_empty() {
                    return Err(Error::NotFound);
                }
                let (lo, hi) = self.search_candidate_range(key);
                let Some(page) = self.find_page_for_key(key, lo, hi)? else {
                    return Err(Error::NotFound);
                };
                self.load_data_page(page, SlotRole::DataRead)?;
                let idx = self
                    .search_in_page(self.pool.slot(SlotRole::DataRead), key)
                    .ok_or(Error::NotFound)?;
                let view = DataPageView::new(self.pool.slot(SlotRole::DataRead), &self.data_layout);
                (view.record_data(idx).to_vec(), view.record_var_offset(idx))
            }
        };

        let Some(offset) = var_offset else {
            return Ok(None);
        };

        // A record's var offset can point at bytes the var stream has since
        // reclaimed; `minVarRecordId` is the key watermark below which that
        // has happened (spec.md §9), so check it before trusting the offset.
        let is_stale = self
            .var_log
            .as_ref()
            .expect("checked above")
            .min_var_record_id()
            .is_some_and(|min_id| self.record_ops.compare_key(key, min_id) != Ordering::Greater);
        if is_stale {
            return Err(Error::Stale);
        }

        let blob = self.var_log.as_mut().expect("checked above").read(&mut self.device, offset)?;
        Ok(Some((data, blob)))
    }

    pub fn iter(&mut self, filter: RangeFilter) -> RangeIter<'_, D, R> {
        RangeIter::new(self, filter)
    }

    /// Force-close the active data page (and its index entry) as if it had
    /// filled up, so every record inserted so far is committed to its
    /// circular log and durable on disk — mirroring the reference
    /// implementation's `sbitsFlush`, which always closes out the current
    /// buffer rather than merely persisting it in place. A `put` right after
    /// `flush` begins a fresh page, even if the flushed one was only
    /// partially full.
    pub fn flush(&mut self) -> Result<()> {
        self.flush_data_page()?;
        self.flush_index_page()?;
        if let Some(var_log) = &mut self.var_log {
            var_log.flush(&mut self.device, self.pool.slot(SlotRole::VarWrite))?;
        }
        self.device.sync()?;

        if let Some(path) = self.manifest_path.clone() {
            self.save_manifest(&path)?;
        }
        Ok(())
    }

    fn save_manifest(&self, path: &Path) -> Result<()> {
        let index_log_snapshot = self.index_log.unwrap_or_else(|| CircularLog::new(0, 1, 1));
        let var_log_snapshot = self
            .var_log
            .unwrap_or_else(|| VarLog::new(0, 1, self.config.page_size, self.config.key_size));
        let manifest = Manifest::from_parts(
            self.config.clone(),
            &self.data_log,
            &index_log_snapshot,
            &var_log_snapshot,
            self.min_key.clone(),
        );
        manifest.save(path)?;
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.flush()?;
        info!("store closed cleanly");
        Ok(())
    }

    pub(crate) fn data_log(&self) -> &CircularLog {
        &self.data_log
    }

    pub(crate) fn data_layout(&self) -> &DataPageLayout {
        &self.data_layout
    }

    pub(crate) fn record_ops(&self) -> &R {
        &self.record_ops
    }

    pub(crate) fn load_data_page_for_iter(&mut self, logical_id: u32) -> Result<()> {
        self.load_data_page(logical_id, SlotRole::DataRead)
    }

    pub(crate) fn read_slot(&self, role: SlotRole) -> &[u8] {
        self.pool.slot(role)
    }

    pub(crate) fn index_layout(&self) -> &IndexPageLayout {
        &self.index_layout
    }

    pub(crate) fn has_index_bitmaps(&self) -> bool {
        self.index_log.is_some() && self.config.parameters.contains(ParamFlags::USE_BMAP)
    }

    pub(crate) fn first_index_page_id(&self) -> u32 {
        self.index_log.as_ref().map(|log| log.first_logical_page_id()).unwrap_or(0)
    }

    pub(crate) fn load_index_page_for_iter(&mut self, logical_id: u32) -> Result<()> {
        if self.pool.cached_logical_id(SlotRole::IndexRead) == Some(logical_id) {
            return Ok(());
        }
        let physical = self
            .index_log
            .as_ref()
            .and_then(|log| log.logical_to_physical(logical_id))
            .ok_or(Error::NotFound)?;
        self.device.read_page(physical, self.pool.slot_mut(SlotRole::IndexRead))?;
        self.pool.mark_cached(SlotRole::IndexRead, logical_id);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn rebuild_index_from_data<D: BlockDevice, R: RecordOps>(
    device: &mut D,
    data_log: &CircularLog,
    layout: &DataPageLayout,
    page_size: u32,
    record_ops: &R,
    index: &mut LearnedIndex,
    radix_bits: u8,
) -> Result<()> {
    let first = data_log.first_logical_page_id();
    let last = data_log.next_logical_id() - 1;
    let mut buf = vec![0u8; page_size as usize];
    for logical_id in first..=last {
        let physical = data_log
            .logical_to_physical(logical_id)
            .expect("page within [first, last] must be live");
        device.read_page(physical, &mut buf)?;
        let view = DataPageView::new(&buf, layout);
        let key_u64 = record_ops.key_to_u64(view.min_key());
        index.spline_mut().add(key_u64, logical_id)?;
    }
    index.spline_mut().finalize()?;
    if let LearnedIndex::RadixSpline(spline, radix) = index {
        *radix = RadixTable::build(spline.knots(), radix_bits);
    }
    Ok(())
}
