//! Process-info stream.
//!
//! `OpenInfo` takes a point-in-time snapshot of the process table and
//! exposes it as a read-only stream of fixed-size little-endian records.

use alloc::vec::Vec;
use spin::Mutex;

use super::ProcessId;
use crate::config::PROCINFO_MAX_ARGS_SIZE;
use crate::error::{KResult, KernelError};
use crate::kernel::Kernel;
use crate::scheduler::ContextRef;
use crate::stream::{Fid, FileOps, StreamObject};

/// One process-table entry as seen by `OpenInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: ProcessId,
    pub ppid: Option<ProcessId>,
    pub alive: bool,
    pub thread_count: u32,
    /// Address of the main task, 0 if none
    pub main_task: u64,
    pub argl: u32,
    /// First `PROCINFO_MAX_ARGS_SIZE` argument bytes
    pub args: Vec<u8>,
}

impl ProcInfo {
    /// Encoded record size in bytes.
    pub const SIZE: usize = 4 + 4 + 1 + 4 + 8 + 4 + PROCINFO_MAX_ARGS_SIZE;

    /// Append the record to `out`. Arguments are zero-padded.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let ppid = self.ppid.map_or(-1, |p| p.0 as i32);
        out.extend_from_slice(&(self.pid.0 as u32).to_le_bytes());
        out.extend_from_slice(&ppid.to_le_bytes());
        out.push(self.alive as u8);
        out.extend_from_slice(&self.thread_count.to_le_bytes());
        out.extend_from_slice(&self.main_task.to_le_bytes());
        out.extend_from_slice(&self.argl.to_le_bytes());
        let n = self.args.len().min(PROCINFO_MAX_ARGS_SIZE);
        out.extend_from_slice(&self.args[..n]);
        out.resize(out.len() + PROCINFO_MAX_ARGS_SIZE - n, 0);
    }

    /// Parse one record.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::SIZE {
            return None;
        }
        let u32_at = |at: usize| -> Option<u32> {
            Some(u32::from_le_bytes(bytes.get(at..at + 4)?.try_into().ok()?))
        };
        let pid = u32_at(0)?;
        let ppid = u32_at(4)? as i32;
        let alive = bytes[8] != 0;
        let thread_count = u32_at(9)?;
        let main_task = u64::from_le_bytes(bytes.get(13..21)?.try_into().ok()?);
        let argl = u32_at(21)?;
        let stored = (argl as usize).min(PROCINFO_MAX_ARGS_SIZE);
        let args = bytes.get(25..25 + stored)?.to_vec();

        Some(ProcInfo {
            pid: ProcessId(pid as usize),
            ppid: (ppid >= 0).then_some(ProcessId(ppid as usize)),
            alive,
            thread_count,
            main_task,
            argl,
            args,
        })
    }
}

/// Snapshot stream payload.
pub struct InfoStream {
    records: Vec<u8>,
    cursor: Mutex<usize>,
}

impl InfoStream {
    pub fn new(infos: &[ProcInfo]) -> Self {
        let mut records = Vec::with_capacity(infos.len() * ProcInfo::SIZE);
        for info in infos {
            info.encode(&mut records);
        }
        InfoStream {
            records,
            cursor: Mutex::new(0),
        }
    }

    /// Copy as many whole records as fit in `buf`. Returns 0 once every
    /// record has been read.
    pub fn read(&self, buf: &mut [u8]) -> KResult<usize> {
        let mut cursor = self.cursor.lock();
        let remaining = self.records.len() - *cursor;
        if remaining == 0 {
            return Ok(0);
        }
        if buf.len() < ProcInfo::SIZE {
            return Err(KernelError::InvalidArgument);
        }
        let n = remaining.min(buf.len() / ProcInfo::SIZE * ProcInfo::SIZE);
        buf[..n].copy_from_slice(&self.records[*cursor..*cursor + n]);
        *cursor += n;
        Ok(n)
    }

    /// Number of records in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len() / ProcInfo::SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn info_read(obj: &StreamObject, _me: &ContextRef, buf: &mut [u8]) -> KResult<usize> {
    match obj {
        StreamObject::Info(info) => info.read(buf),
        _ => Err(KernelError::IllegalState),
    }
}

pub static INFO_OPS: FileOps = FileOps {
    open: None,
    read: Some(info_read),
    write: None,
    close: None,
};

impl Kernel {
    /// Snapshot of every live or zombie process, in pid order.
    pub fn process_info(&self) -> Vec<ProcInfo> {
        let st = self.lock();
        st.procs
            .iter()
            .map(|(pid, p)| ProcInfo {
                pid,
                ppid: p.parent,
                alive: p.is_alive(),
                thread_count: st.threads.count_owned(pid, p.generation) as u32,
                main_task: p.main_task.map_or(0, |t| t as usize as u64),
                argl: p.argl as u32,
                args: p.args[..p.args.len().min(PROCINFO_MAX_ARGS_SIZE)].to_vec(),
            })
            .collect()
    }

    /// Open a process-info stream in the calling process.
    pub fn open_info(&self) -> KResult<Fid> {
        let stream = InfoStream::new(&self.process_info());
        let fids = self.open_streams(alloc::vec![StreamObject::Info(stream)])?;
        Ok(fids[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn sample(pid: usize, args: &[u8]) -> ProcInfo {
        ProcInfo {
            pid: ProcessId(pid),
            ppid: Some(ProcessId::INIT),
            alive: true,
            thread_count: 2,
            main_task: 0xdead_beef,
            argl: args.len() as u32,
            args: args.to_vec(),
        }
    }

    #[test]
    fn test_record_layout() {
        let mut out = Vec::new();
        sample(7, b"arg").encode(&mut out);
        assert_eq!(out.len(), ProcInfo::SIZE);
        assert_eq!(&out[0..4], &7u32.to_le_bytes());
        assert_eq!(&out[4..8], &1i32.to_le_bytes());
        assert_eq!(out[8], 1);
        assert_eq!(&out[25..28], b"arg");
        assert!(out[28..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parentless_and_long_args() {
        let long = vec![0xAB; PROCINFO_MAX_ARGS_SIZE + 40];
        let mut info = sample(1, &long);
        info.ppid = None;
        let mut out = Vec::new();
        info.encode(&mut out);

        let back = ProcInfo::decode(&out).unwrap();
        assert_eq!(back.ppid, None);
        assert_eq!(back.argl as usize, PROCINFO_MAX_ARGS_SIZE + 40);
        assert_eq!(back.args.len(), PROCINFO_MAX_ARGS_SIZE);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(ProcInfo::decode(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_stream_returns_whole_records() {
        let stream = InfoStream::new(&[sample(2, b""), sample(3, b"x"), sample(4, b"yy")]);
        assert_eq!(stream.len(), 3);

        let mut small = [0u8; 10];
        assert_eq!(stream.read(&mut small), Err(KernelError::InvalidArgument));

        let mut buf = vec![0u8; ProcInfo::SIZE * 2 + 5];
        assert_eq!(stream.read(&mut buf).unwrap(), ProcInfo::SIZE * 2);
        assert_eq!(ProcInfo::decode(&buf).unwrap().pid, ProcessId(2));
        assert_eq!(ProcInfo::decode(&buf[ProcInfo::SIZE..]).unwrap().pid, ProcessId(3));

        assert_eq!(stream.read(&mut buf).unwrap(), ProcInfo::SIZE);
        assert_eq!(ProcInfo::decode(&buf).unwrap().args, b"yy".to_vec());
        assert_eq!(stream.read(&mut buf).unwrap(), 0);
    }
}
