use crate::bus::Target;
use crate::message::{Command, Message, Payload, ResponseStatus, Transaction};
use crate::segment::Segment;
use crate::Time;
use bitvec::vec::BitVec;
use log::{trace, warn};
use std::collections::HashMap;

/// Byte-addressed RAM serving one or more segments, with load-linked/store-conditional support.
///
/// Memory is organised in cells of `cell_size` bytes (the data width of the fabric). An access of
/// `n` cells is answered `2n - 1` time units after it arrives, an erroneous access after `n`.
#[derive(Debug)]
pub struct Ram {
    name: String,
    cell_size: usize,
    /// One zero-initialized region per segment.
    regions: Vec<(Segment, Vec<u8>)>,
    /// Reserved cell address -> source id holding the reservation.
    reservations: HashMap<u64, u32>,
    time: Time,
    reads: u64,
    writes: u64,
}

impl Ram {
    /// Creates a zero-initialized RAM serving `segments`.
    ///
    /// Returns `None` if `cell_size` is zero, or if a segment cannot be held in memory.
    pub fn new(name: impl Into<String>, segments: Vec<Segment>, cell_size: usize) -> Option<Self> {
        if cell_size == 0 {
            return None;
        }
        let regions = segments
            .into_iter()
            .map(|segment| {
                let size = usize::try_from(segment.range().size()?).ok()?;
                Some((segment, vec![0; size]))
            })
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            name: name.into(),
            cell_size,
            regions,
            reservations: HashMap::new(),
            time: 0,
            reads: 0,
            writes: 0,
        })
    }

    /// Number of cells read so far (including locked reads).
    pub fn reads(&self) -> u64 {
        self.reads
    }

    /// Number of cells written so far (including store-conditionals).
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Initializes memory at `address` with `bytes`, without any simulated side effect.
    ///
    /// Returns `false`, writing nothing, if the range is not inside a single segment.
    pub fn load(&mut self, address: u64, bytes: &[u8]) -> bool {
        match self.region_mut(address, bytes.len()) {
            Some(region) => {
                region.copy_from_slice(bytes);
                true
            }
            None => false,
        }
    }

    /// Returns a copy of `len` bytes at `address`, or `None` if the range is not inside a single
    /// segment.
    pub fn peek(&self, address: u64, len: usize) -> Option<Vec<u8>> {
        let (segment, data) = self
            .regions
            .iter()
            .find(|(s, _)| s.range().contains_access(address, len as u64))?;
        let offset = (address - segment.base_address()) as usize;
        Some(data[offset..offset + len].to_vec())
    }

    fn region_mut(&mut self, address: u64, len: usize) -> Option<&mut [u8]> {
        let (segment, data) = self
            .regions
            .iter_mut()
            .find(|(s, _)| s.range().contains_access(address, len as u64))?;
        let offset = (address - segment.base_address()) as usize;
        Some(&mut data[offset..offset + len])
    }

    fn cells(&self, len: usize) -> u64 {
        len.div_ceil(self.cell_size).max(1) as u64
    }

    fn cell_address(&self, address: u64) -> u64 {
        address - address % self.cell_size as u64
    }

    /// Serves `transaction`, returning `false` if it addresses memory outside every segment.
    fn serve(&mut self, transaction: &mut Transaction) -> bool {
        let address = transaction.address;
        let len = transaction.len();
        let cells = self.cells(len);
        let src_id = transaction.src_id;
        // Cell-aligned address of every byte of the access.
        let byte_cells: Vec<u64> = (0..len as u64)
            .map(|i| self.cell_address(address + i))
            .collect();

        match transaction.command {
            Command::Read => {
                let Some(bytes) = self.peek(address, len) else {
                    return false;
                };
                transaction.data = bytes;
                self.reads += cells;
            }
            Command::LockedRead => {
                let Some(bytes) = self.peek(address, len) else {
                    return false;
                };
                transaction.data = bytes;
                for &cell in &byte_cells {
                    self.reservations.insert(cell, src_id);
                }
                self.reads += cells;
            }
            Command::Write => {
                if self.peek(address, len).is_none() {
                    return false;
                }
                for &cell in &byte_cells {
                    self.reservations.remove(&cell);
                }
                let Some(region) = self.region_mut(address, len) else {
                    return false;
                };
                for (i, &byte) in transaction.data.iter().enumerate() {
                    if is_enabled(&transaction.byte_enable, i) {
                        region[i] = byte;
                    }
                }
                self.writes += cells;
            }
            Command::StoreConditional => {
                if self.peek(address, len).is_none() {
                    return false;
                }
                // Each cell succeeds or fails on its own reservation.
                let mut success: HashMap<u64, bool> = HashMap::new();
                for &cell in &byte_cells {
                    success
                        .entry(cell)
                        .or_insert_with(|| self.reservations.get(&cell) == Some(&src_id));
                }
                for (cell, ok) in &success {
                    if *ok {
                        self.reservations.remove(cell);
                    }
                }
                trace!("{}: SC by {src_id} at {address:#x}: {success:?}", self.name);

                let data = std::mem::take(&mut transaction.data);
                let mut response = vec![0u8; len];
                let Some(region) = self.region_mut(address, len) else {
                    return false;
                };
                for (i, &byte) in data.iter().enumerate() {
                    let cell = byte_cells[i];
                    if success[&cell] {
                        if is_enabled(&transaction.byte_enable, i) {
                            region[i] = byte;
                        }
                    } else if address + i as u64 == cell {
                        // Little-endian 1 in a failed cell, 0 elsewhere.
                        response[i] = 1;
                    }
                }
                transaction.data = response;
                self.writes += cells;
            }
        }
        true
    }
}

/// Bytes without a byte enable bit are treated as enabled.
fn is_enabled(byte_enable: &BitVec, index: usize) -> bool {
    byte_enable.get(index).map_or(true, |bit| *bit)
}

impl Target for Ram {
    fn name(&self) -> &str {
        &self.name
    }

    fn transport(&mut self, message: Message) -> Option<Message> {
        self.time = self.time.max(message.time);
        let Payload::Transaction(mut transaction) = message.payload else {
            return None;
        };

        let cells = self.cells(transaction.len());
        if self.serve(&mut transaction) {
            transaction.status = ResponseStatus::Ok;
            Some(Message::transaction(transaction, self.time + 2 * cells - 1))
        } else {
            warn!(
                "{}: {} at {:#x} (len {}) outside its segments",
                self.name,
                transaction.command,
                transaction.address,
                transaction.len()
            );
            Some(Message::transaction(
                transaction.into_error(),
                self.time + cells,
            ))
        }
    }

    fn local_time(&self) -> Time {
        self.time
    }
}
