//! Call frames and the process-wide frame pool.
//!
//! Frames churn on every call, so disposed frames are zeroed and kept on a
//! free list instead of going back to the allocator. Correctness does not
//! depend on the pool; it only avoids allocation on the call path.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::{bytecode::CodeUnit, value::Closure};

#[derive(Default)]
pub struct Frame {
    pub code: Option<Arc<CodeUnit>>,
    pub closure: Option<Arc<Closure>>,
    pub ip: usize,
    /// Index into the fiber's operand stack where this frame begins.
    pub sp: usize,
    pub caller: Option<Box<Frame>>,
}

impl Frame {
    fn clear(&mut self) {
        self.code = None;
        self.closure = None;
        self.ip = 0;
        self.sp = 0;
        self.caller = None;
    }

    pub fn is_cleared(&self) -> bool {
        self.code.is_none()
            && self.closure.is_none()
            && self.ip == 0
            && self.sp == 0
            && self.caller.is_none()
    }
}

static FRAME_POOL: Lazy<Mutex<Vec<Box<Frame>>>> = Lazy::new(|| Mutex::new(Vec::new()));

pub fn alloc_frame() -> Box<Frame> {
    if let Some(frame) = FRAME_POOL.lock().pop() {
        return frame;
    }
    Box::new(Frame::default())
}

pub fn dispose_frame(mut frame: Box<Frame>) {
    frame.clear();
    FRAME_POOL.lock().push(frame);
}

#[cfg(test)]
pub fn pool_len() -> usize {
    FRAME_POOL.lock().len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disposed_frames_come_back_cleared() {
        let mut frame = alloc_frame();
        frame.ip = 17;
        frame.sp = 3;
        dispose_frame(frame);
        let again = alloc_frame();
        assert!(again.is_cleared());
        dispose_frame(again);
    }

    #[test]
    fn test_pool_under_pressure() {
        // allocate and dispose a large batch; every recycled frame must be
        // zeroed and the pool must not lose frames
        let mut held = Vec::new();
        for _ in 0..1000 {
            held.push(alloc_frame());
        }
        for mut frame in held.drain(..) {
            frame.ip = 99;
            frame.code = None;
            dispose_frame(frame);
        }
        for _ in 0..100_000 {
            let frame = alloc_frame();
            assert!(frame.is_cleared());
            dispose_frame(frame);
        }
        assert!(pool_len() >= 1000);
    }

    #[test]
    fn test_caller_links_are_severed_on_dispose() {
        let mut top = alloc_frame();
        top.caller = Some(alloc_frame());
        dispose_frame(top);
        let recycled = alloc_frame();
        assert!(recycled.caller.is_none());
        dispose_frame(recycled);
    }
}
