// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Adaptive backoff: busy spin, then CPU pause, then yield, then sleep.
// Used while waiting for another process to finish region initialization
// and by the macOS timed-lock emulation.

/// Advance one backoff step.
///
/// - k < 4:  busy spin
/// - k < 16: CPU pause hint
/// - k < 32: thread yield
/// - k >= 32: sleep 1ms
#[inline]
pub(crate) fn step(k: &mut u32) {
    if *k < 4 {
        // busy spin
    } else if *k < 16 {
        std::hint::spin_loop();
    } else if *k < 32 {
        std::thread::yield_now();
    } else {
        std::thread::sleep(std::time::Duration::from_millis(1));
        return;
    }
    *k += 1;
}
