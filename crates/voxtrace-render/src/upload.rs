//! Staging buffer handoff between the octree mutator and the render loop.
//!
//! A single producer owns write access to the mapped staging buffer. Once a
//! write completes it is published, and the render loop consumes the
//! publication at most once by submitting the upload command buffer
//! variant. Until that copy has completed on the GPU the producer cannot
//! start another write, so the handoff behaves like a channel of depth one.

use crate::recorder::FrameVariant;
use parking_lot::{Condvar, Mutex};
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::Arc;

/// Host-mapped staging memory viewed as octree words.
#[derive(Debug, Clone, Copy)]
pub struct StagingRegion {
    ptr: NonNull<u32>,
    len: usize,
}

// The handoff state serializes every access to the region.
unsafe impl Send for StagingRegion {}
unsafe impl Sync for StagingRegion {}

impl StagingRegion {
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` aligned words until
    /// the owning channel is closed.
    pub unsafe fn new(ptr: NonNull<u32>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// Number of words.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Read the region.
    ///
    /// # Safety
    /// No write may be in progress.
    pub unsafe fn as_slice(&self) -> &[u32] {
        std::slice::from_raw_parts(self.ptr.as_ptr(), self.len)
    }
}

#[derive(Debug, Default)]
struct HandoffState {
    pending: bool,
    writer_active: bool,
    in_flight: Option<usize>,
    closed: bool,
}

impl HandoffState {
    /// The staging words still hold data the GPU has not finished copying.
    fn is_busy(&self) -> bool {
        self.pending || self.in_flight.is_some()
    }
}

struct Handoff {
    state: Mutex<HandoffState>,
    changed: Condvar,
    region: StagingRegion,
}

/// Create the producer and consumer ends for a staging region.
pub fn upload_channel(region: StagingRegion) -> (StagingWriter, UploadReceiver) {
    let shared = Arc::new(Handoff {
        state: Mutex::new(HandoffState::default()),
        changed: Condvar::new(),
        region,
    });
    (
        StagingWriter {
            shared: shared.clone(),
        },
        UploadReceiver { shared },
    )
}

/// Producer end, owned by the octree mutator.
pub struct StagingWriter {
    shared: Arc<Handoff>,
}

impl StagingWriter {
    /// Start writing, waiting while the previous publication is unconsumed
    /// or its copy is still in flight.
    ///
    /// Returns `None` once the channel is closed.
    pub fn begin(&mut self) -> Option<StagingWriteGuard<'_>> {
        let mut state = self.shared.state.lock();
        while state.is_busy() && !state.closed {
            self.shared.changed.wait(&mut state);
        }
        self.start(&mut state)
    }

    /// Start writing only if the last publication has been copied.
    pub fn try_begin(&mut self) -> Option<StagingWriteGuard<'_>> {
        let mut state = self.shared.state.lock();
        if state.is_busy() {
            return None;
        }
        self.start(&mut state)
    }

    fn start(&self, state: &mut HandoffState) -> Option<StagingWriteGuard<'_>> {
        if state.closed {
            return None;
        }
        state.writer_active = true;
        Some(StagingWriteGuard {
            shared: &self.shared,
        })
    }

    /// Whether the render side has closed the channel.
    pub fn is_closed(&self) -> bool {
        self.shared.state.lock().closed
    }

    /// Number of words in the staging buffer.
    pub fn capacity(&self) -> usize {
        self.shared.region.len()
    }
}

/// Exclusive access to the staging words. Dropping it publishes the write.
pub struct StagingWriteGuard<'a> {
    shared: &'a Handoff,
}

impl Deref for StagingWriteGuard<'_> {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        unsafe { self.shared.region.as_slice() }
    }
}

impl DerefMut for StagingWriteGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u32] {
        let region = self.shared.region;
        unsafe { std::slice::from_raw_parts_mut(region.ptr.as_ptr(), region.len) }
    }
}

impl Drop for StagingWriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        state.writer_active = false;
        state.pending = true;
        self.shared.changed.notify_all();
    }
}

/// Consumer end, owned by the render loop.
pub struct UploadReceiver {
    shared: Arc<Handoff>,
}

impl UploadReceiver {
    /// Consume a pending publication for `frame_slot`.
    ///
    /// Returns [`FrameVariant::Upload`] at most once per publication, and
    /// never while a write is in progress. The copy is then in flight until
    /// [`retire`](Self::retire) is called for the same slot.
    pub fn take(&self, frame_slot: usize) -> FrameVariant {
        let mut state = self.shared.state.lock();
        if state.pending && !state.writer_active && state.in_flight.is_none() && !state.closed {
            state.pending = false;
            state.in_flight = Some(frame_slot);
            FrameVariant::Upload
        } else {
            FrameVariant::Resident
        }
    }

    /// The slot's fence has signaled, its copy is complete.
    pub fn retire(&self, frame_slot: usize) {
        let mut state = self.shared.state.lock();
        if state.in_flight == Some(frame_slot) {
            state.in_flight = None;
            self.shared.changed.notify_all();
        }
    }

    /// The device is idle, no copy can be in flight.
    pub fn retire_all(&self) {
        let mut state = self.shared.state.lock();
        if state.in_flight.take().is_some() {
            self.shared.changed.notify_all();
        }
    }

    /// Handle that can close the channel from the buffer owner's side.
    pub fn closer(&self) -> UploadCloser {
        UploadCloser {
            shared: self.shared.clone(),
        }
    }

    /// Whether a publication is waiting to be consumed.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().pending
    }
}

/// Closes the channel before the staging memory is released.
#[derive(Clone)]
pub struct UploadCloser {
    shared: Arc<Handoff>,
}

impl UploadCloser {
    /// Refuse further writes and wait for an active one to finish.
    pub fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.changed.notify_all();
        while state.writer_active {
            self.shared.changed.wait(&mut state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel(words: usize) -> (Box<[u32]>, StagingWriter, UploadReceiver) {
        let mut storage = vec![0u32; words].into_boxed_slice();
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let region = unsafe { StagingRegion::new(ptr, words) };
        let (writer, receiver) = upload_channel(region);
        (storage, writer, receiver)
    }

    #[test]
    fn nothing_pending_means_resident() {
        let (_storage, _writer, receiver) = channel(4);
        assert_eq!(receiver.take(0), FrameVariant::Resident);
        assert_eq!(receiver.take(1), FrameVariant::Resident);
    }

    #[test]
    fn publication_is_consumed_once() {
        let (_storage, mut writer, receiver) = channel(4);
        {
            let mut guard = writer.begin().unwrap();
            guard.fill(7);
        }
        assert!(receiver.is_pending());
        assert_eq!(receiver.take(0), FrameVariant::Upload);
        assert_eq!(receiver.take(1), FrameVariant::Resident);
        receiver.retire(0);
        assert_eq!(receiver.take(0), FrameVariant::Resident);
    }

    #[test]
    fn no_upload_while_writing() {
        let (_storage, mut writer, receiver) = channel(4);
        let guard = writer.begin().unwrap();
        assert_eq!(receiver.take(0), FrameVariant::Resident);
        drop(guard);
        assert_eq!(receiver.take(0), FrameVariant::Upload);
    }

    #[test]
    fn try_begin_refuses_during_copy() {
        let (_storage, mut writer, receiver) = channel(4);
        drop(writer.begin());
        assert_eq!(receiver.take(1), FrameVariant::Upload);
        assert!(writer.try_begin().is_none());
        receiver.retire(0);
        assert!(writer.try_begin().is_none());
        receiver.retire(1);
        assert!(writer.try_begin().is_some());
    }

    #[test]
    fn unconsumed_publication_blocks_next_write() {
        let (_storage, mut writer, receiver) = channel(4);
        drop(writer.begin());
        assert!(writer.try_begin().is_none());
        assert_eq!(receiver.take(0), FrameVariant::Upload);
        receiver.retire(0);
        assert!(writer.try_begin().is_some());
    }

    #[test]
    fn continuous_writer_still_uploads() {
        use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

        let (_storage, mut writer, receiver) = channel(4096);
        let stop = Arc::new(AtomicBool::new(false));
        let rounds = Arc::new(AtomicU32::new(0));

        let handle = {
            let stop = stop.clone();
            let rounds = rounds.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    let Some(mut guard) = writer.begin() else {
                        break;
                    };
                    let round = rounds.fetch_add(1, Ordering::AcqRel);
                    guard.fill(round);
                }
            })
        };

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut uploads = 0;
        while uploads < 3 && std::time::Instant::now() < deadline {
            if receiver.take(0) == FrameVariant::Upload {
                uploads += 1;
            }
            receiver.retire(0);
            std::thread::yield_now();
        }
        let writer_running = !handle.is_finished();

        stop.store(true, Ordering::Release);
        receiver.closer().close();
        handle.join().unwrap();

        assert!(writer_running);
        assert!(uploads >= 1, "no upload taken while the writer was running");
    }

    #[test]
    fn begin_waits_for_retire() {
        let (_storage, mut writer, receiver) = channel(4);
        drop(writer.begin());
        assert_eq!(receiver.take(0), FrameVariant::Upload);

        let handle = std::thread::spawn(move || {
            let mut guard = writer.begin().unwrap();
            guard[0] = 42;
        });
        std::thread::sleep(Duration::from_millis(20));
        assert!(!receiver.is_pending());

        receiver.retire_all();
        handle.join().unwrap();
        assert!(receiver.is_pending());
    }

    #[test]
    fn close_stops_writer() {
        let (_storage, mut writer, receiver) = channel(4);
        drop(writer.begin());
        assert_eq!(receiver.take(0), FrameVariant::Upload);

        let handle = std::thread::spawn(move || writer.begin().is_none());
        std::thread::sleep(Duration::from_millis(20));
        receiver.closer().close();

        assert!(handle.join().unwrap());
        assert_eq!(receiver.take(0), FrameVariant::Resident);
    }

    #[test]
    fn guard_writes_reach_region() {
        let (storage, mut writer, _receiver) = channel(3);
        {
            let mut guard = writer.begin().unwrap();
            guard.copy_from_slice(&[1, 2, 3]);
        }
        assert_eq!(&*storage, &[1, 2, 3]);
        assert_eq!(writer.capacity(), 3);
    }
}
