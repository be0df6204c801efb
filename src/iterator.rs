//! Range iteration over the data stream: a monotone key range, an
//! optional data-value range accelerated by the per-page bitmap, or both
//! together.
//!
//! A starting page is located with the same binary search `Engine::get`
//! uses (since pages are implicitly key-sorted), then pages scan forward.
//! When a data-value range is given and the index stream holds bitmap
//! summaries for it, each candidate page's bitmap is read out of the
//! index stream instead of opening the data page itself; only a page the
//! index says may qualify gets decoded. A page the index hasn't caught up
//! to yet (the still-open write buffer) falls back to its own bitmap.

use std::cmp::Ordering;

use crate::buffer_pool::SlotRole;
use crate::device::BlockDevice;
use crate::engine::Engine;
use crate::error::Result;
use crate::page::{DataPageView, IndexPageView};
use crate::record_ops::RecordOps;

/// Inclusive bounds for a range scan. `None` means unbounded on that side.
#[derive(Debug, Clone, Default)]
pub struct RangeFilter {
    pub min_key: Option<Vec<u8>>,
    pub max_key: Option<Vec<u8>>,
    pub min_data: Option<Vec<u8>>,
    pub max_data: Option<Vec<u8>>,
}

fn bitmaps_overlap(a: &[u8], b: &[u8]) -> bool {
    a.iter().zip(b.iter()).any(|(x, y)| x & y != 0)
}

pub struct RangeIter<'a, D: BlockDevice, R: RecordOps> {
    engine: &'a mut Engine<D, R>,
    filter: RangeFilter,
    bitmap_query: Option<Vec<u8>>,
    use_index_bitmaps: bool,
    index_page: u32,
    current_page: u32,
    last_page: u32,
    record_index: usize,
    exhausted: bool,
}

impl<'a, D: BlockDevice, R: RecordOps> RangeIter<'a, D, R> {
    pub(crate) fn new(engine: &'a mut Engine<D, R>, filter: RangeFilter) -> Self {
        let (first, last, empty) = {
            let log = engine.data_log();
            (log.first_logical_page_id(), log.next_logical_id().saturating_sub(1), log.is_empty())
        };

        let bitmap_query = if filter.min_data.is_some() || filter.max_data.is_some() {
            let bitmap_size = engine.data_layout().bitmap_size;
            let mut bitmap = vec![0u8; bitmap_size];
            engine
                .record_ops()
                .build_bitmap_from_range(filter.min_data.as_deref(), filter.max_data.as_deref(), &mut bitmap);
            Some(bitmap)
        } else {
            None
        };
        let use_index_bitmaps = bitmap_query.is_some() && engine.has_index_bitmaps();
        let index_page = engine.first_index_page_id();

        let mut iter = Self {
            engine,
            filter,
            bitmap_query,
            use_index_bitmaps,
            index_page,
            current_page: first,
            last_page: last,
            record_index: 0,
            exhausted: empty,
        };
        if !iter.exhausted {
            iter.seek_to_min_key();
            if iter.current_page > iter.last_page {
                iter.exhausted = true;
            }
        }
        iter
    }

    fn seek_to_min_key(&mut self) {
        let Some(min_key) = self.filter.min_key.clone() else {
            return;
        };
        let mut lo = self.current_page as i64;
        let mut hi = self.last_page as i64;
        let mut result = self.last_page as i64 + 1;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if self.engine.load_data_page_for_iter(mid as u32).is_err() {
                break;
            }
            let max_key = {
                let layout = self.engine.data_layout();
                let buf = self.engine.read_slot(SlotRole::DataRead);
                DataPageView::new(buf, layout).max_key().to_vec()
            };
            if self.engine.record_ops().compare_key(&max_key, &min_key) == Ordering::Less {
                lo = mid + 1;
            } else {
                result = mid;
                hi = mid - 1;
            }
        }
        self.current_page = result.max(self.current_page as i64) as u32;
    }

    /// Look up `data_page`'s bitmap summary in the index stream, without
    /// touching the data stream at all. `None` means the index hasn't
    /// indexed that page yet (it's still the open write buffer, or sits
    /// past whatever has been flushed) and the caller should fall back to
    /// the data page's own bitmap.
    fn bitmap_from_index(&mut self, data_page: u32) -> Option<Vec<u8>> {
        loop {
            if self.engine.load_index_page_for_iter(self.index_page).is_err() {
                return None;
            }
            let (min_data_page_id, count) = {
                let layout = self.engine.index_layout();
                let buf = self.engine.read_slot(SlotRole::IndexRead);
                let view = IndexPageView::new(buf, layout);
                (view.min_data_page_id(), view.count() as u32)
            };
            if count == 0 || data_page < min_data_page_id {
                return None;
            }
            if data_page > min_data_page_id + count - 1 {
                self.index_page += 1;
                continue;
            }
            let entry = (data_page - min_data_page_id) as usize;
            let layout = self.engine.index_layout();
            let buf = self.engine.read_slot(SlotRole::IndexRead);
            return Some(IndexPageView::new(buf, layout).bitmap_at(entry).to_vec());
        }
    }

    /// Skip pages whose bitmap summary cannot intersect the data-value
    /// query. Returns `false` once there are no more pages to try.
    fn advance_to_qualifying_page(&mut self) -> bool {
        loop {
            if self.current_page > self.last_page {
                return false;
            }
            if self.engine.load_data_page_for_iter(self.current_page).is_err() {
                return false;
            }
            if let Some(query) = self.bitmap_query.clone() {
                let bitmap = if self.use_index_bitmaps {
                    self.bitmap_from_index(self.current_page)
                } else {
                    None
                };
                let bitmap = bitmap.unwrap_or_else(|| {
                    let layout = self.engine.data_layout();
                    let buf = self.engine.read_slot(SlotRole::DataRead);
                    DataPageView::new(buf, layout).bitmap().to_vec()
                });
                if !bitmaps_overlap(&bitmap, &query) {
                    self.current_page += 1;
                    self.record_index = 0;
                    continue;
                }
            }
            return true;
        }
    }
}

impl<'a, D: BlockDevice, R: RecordOps> Iterator for RangeIter<'a, D, R> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return None;
            }
            if !self.advance_to_qualifying_page() {
                self.exhausted = true;
                return None;
            }

            let layout = self.engine.data_layout();
            let buf = self.engine.read_slot(SlotRole::DataRead);
            let view = DataPageView::new(buf, layout);
            let count = view.count() as usize;

            if self.record_index >= count {
                self.current_page += 1;
                self.record_index = 0;
                continue;
            }

            let key = view.record_key(self.record_index).to_vec();
            let data = view.record_data(self.record_index).to_vec();
            self.record_index += 1;

            if let Some(max_key) = &self.filter.max_key {
                if self.engine.record_ops().compare_key(&key, max_key) == Ordering::Greater {
                    self.exhausted = true;
                    return None;
                }
            }
            if let Some(min_key) = &self.filter.min_key {
                if self.engine.record_ops().compare_key(&key, min_key) == Ordering::Less {
                    continue;
                }
            }
            if let Some(min_data) = &self.filter.min_data {
                if self.engine.record_ops().compare_data(&data, min_data) == Ordering::Less {
                    continue;
                }
            }
            if let Some(max_data) = &self.filter.max_data {
                if self.engine.record_ops().compare_data(&data, max_data) == Ordering::Greater {
                    continue;
                }
            }

            return Some(Ok((key, data)));
        }
    }
}
