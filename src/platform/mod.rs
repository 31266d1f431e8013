// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 shmsg contributors
//
// Raw OS layer. The channel's synchronization objects (mutex, event
// mutex/cond pairs) live inside the mapped region itself, so everything
// here is process-shared pthread plumbing plus shm_open/mmap management.

#[cfg(not(unix))]
compile_error!("shmsg requires a Unix-like OS (process-shared pthread primitives).");

pub(crate) mod posix;
