//! The trace drivers: a single-configuration run and the parallel batch
//! runner.
//!
//! The batch runner pairs one worker thread per configuration with a single
//! reader (the calling thread). The reader decodes the trace in chunks and
//! hands every worker an `Arc` of the current chunk through a bounded
//! channel of depth one, so each worker has at most one chunk in flight
//! while the next is being read — the same double buffering a barrier-and-
//! swap scheme would give, without the shared mutable buffer. Workers own
//! their memory systems outright and meet the reader only at the channel;
//! the final CSV emission is serialised by the caller's mutex.

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread;

use crate::bus::MemorySystem;
use crate::config::SystemConfig;
use crate::trace::{iter_records, TraceRecord, TRACE_RECORD_SIZE};

/// Records buffered per batch chunk.
pub const N_TRACE_BUF: usize = 1_000_000;

/// Drive one memory system over a record stream. `limit` caps the number
/// of records consumed; `None` runs the whole stream.
pub fn run_single(
    config: &SystemConfig,
    records: impl IntoIterator<Item = TraceRecord>,
    limit: Option<usize>,
) -> MemorySystem {
    let mut system = MemorySystem::new(config.clone());
    let limit = limit.unwrap_or(usize::MAX);
    for record in records.into_iter().take(limit) {
        dispatch(&mut system, record);
    }
    system
}

fn dispatch(system: &mut MemorySystem, record: TraceRecord) {
    if record.is_write {
        system.pr_wr(record.addr, record.cpu);
    } else {
        system.pr_rd(record.addr, record.cpu);
    }
}

/// Run one simulation per configuration in parallel over the same trace
/// stream, writing each finished simulation's CSV rows under `out`'s lock.
///
/// Workers that reach `limit` stop early; the reader stops once the limit
/// or EOF is reached and the dropped channels let the remaining workers
/// drain out.
pub fn run_batch<W: Write + Send>(
    configs: &[SystemConfig],
    trace_file: File,
    limit: Option<usize>,
    out: &Mutex<W>,
) -> io::Result<()> {
    let limit = limit.unwrap_or(usize::MAX);

    thread::scope(|scope| {
        let mut senders: Vec<SyncSender<Arc<[TraceRecord]>>> =
            Vec::with_capacity(configs.len());
        for config in configs {
            let (sender, receiver) = mpsc::sync_channel::<Arc<[TraceRecord]>>(1);
            senders.push(sender);
            scope.spawn(move || {
                let mut system = MemorySystem::new(config.clone());
                let mut processed = 0usize;
                'chunks: for chunk in receiver {
                    for &record in chunk.iter() {
                        dispatch(&mut system, record);
                        processed += 1;
                        if processed == limit {
                            break 'chunks;
                        }
                    }
                }
                let mut out = out.lock().unwrap();
                for report in system.reports() {
                    let _ = writeln!(out, "{}", report.to_csv_row());
                }
            });
        }

        let mut trace_file = trace_file;
        let mut buf = vec![0u8; N_TRACE_BUF * TRACE_RECORD_SIZE];
        let mut sent = 0usize;
        while sent < limit {
            let bytes_read = read_chunk(&mut trace_file, &mut buf)?;
            if bytes_read == 0 {
                break;
            }
            let chunk: Arc<[TraceRecord]> = iter_records(&buf[..bytes_read]).collect();
            sent += chunk.len();
            for sender in &senders {
                // A worker that already hit its limit has dropped its
                // receiver; everyone else applies backpressure here
                let _ = sender.send(chunk.clone());
            }
        }
        Ok(())
    })
}

/// Fill `buf` from `reader`, tolerating short reads. Returns the number of
/// bytes read; zero only at EOF.
fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
