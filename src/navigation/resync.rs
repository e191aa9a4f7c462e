//! Instruction boundary recovery by forward decoding.
//!
//! The instruction stream cannot be decoded backward. Every primitive here
//! guesses a start address some distance before the target, decodes
//! forward, and only accepts the answer if the decode lands exactly on the
//! target. On a miss the lookback window doubles, so each search costs
//! O(log distance) reads and ends once the window reaches address 0.

use crate::disasm::{decode, MAX_INSTRUCTION_SIZE};
use crate::error::Result;

use super::MemorySource;

/// First lookback window for single-instruction searches.
pub const MIN_LOOKBACK: usize = 32;

/// Extra bytes added to `count * 3` when sizing multi-instruction windows.
const LOOKBACK_SLACK: usize = 16;

const ADDRESS_SPACE: usize = 0x10000;

fn window_low(target: u16, back: usize) -> u16 {
    (target as usize).saturating_sub(back) as u16
}

/// Read `[low, target]` plus the instruction at `target` and decode it.
async fn boundaries<M>(mem: &M, low: u16, target: u16) -> Result<Vec<u16>>
where
    M: MemorySource + ?Sized,
{
    let len = (target - low) as usize + MAX_INSTRUCTION_SIZE;
    let bytes = mem.read_memory(low, len).await?;
    Ok(decode(low, &bytes).iter().map(|ins| ins.address).collect())
}

/// Start of the instruction immediately before `addr`.
///
/// Returns 0 when `addr` has no predecessor.
pub async fn find_prev_start<M>(mem: &M, addr: u16) -> Result<u16>
where
    M: MemorySource + ?Sized,
{
    if addr == 0 {
        return Ok(0);
    }

    let mut back = MIN_LOOKBACK;
    loop {
        let low = window_low(addr, back);
        let addrs = boundaries(mem, low, addr).await?;
        let prev = addrs.iter().rev().copied().find(|&a| a < addr);

        if addrs.contains(&addr) {
            let prev = prev.unwrap_or(low);
            tracing::debug!(addr, low, prev, "previous instruction resolved");
            return Ok(prev);
        }
        if low == 0 {
            // addr is not a boundary of the decode from 0
            return Ok(prev.unwrap_or(0));
        }
        back *= 2;
    }
}

/// Start of the `count`-th instruction before `addr`.
///
/// Near address 0, where fewer than `count` predecessors exist, the
/// earliest instruction is returned.
pub async fn find_prev_start_n<M>(mem: &M, addr: u16, count: usize) -> Result<u16>
where
    M: MemorySource + ?Sized,
{
    if count == 0 || addr == 0 {
        return Ok(addr);
    }

    let mut back = count * MAX_INSTRUCTION_SIZE + LOOKBACK_SLACK;
    loop {
        let low = window_low(addr, back);
        let addrs = boundaries(mem, low, addr).await?;

        if let Some(pos) = addrs.iter().position(|&a| a == addr) {
            if pos >= count {
                let start = addrs[pos - count];
                tracing::debug!(addr, count, low, start, "instruction run resolved");
                return Ok(start);
            }
        }
        if low == 0 {
            let before: Vec<u16> = addrs.into_iter().filter(|&a| a < addr).collect();
            return Ok(if before.len() >= count {
                before[before.len() - count]
            } else {
                before.first().copied().unwrap_or(0)
            });
        }
        back *= 2;
    }
}

/// Start address that puts `pc` on the last row of a `height`-row view.
///
/// A window whose decode does not end exactly on `pc` is rejected and the
/// search widens. When the decode from address 0 still misses `pc` (it sits
/// inside an instruction), `pc` itself is returned.
pub async fn find_start_with_pc_on_bottom<M>(mem: &M, pc: u16, height: usize) -> Result<u16>
where
    M: MemorySource + ?Sized,
{
    if height <= 1 {
        return Ok(pc);
    }

    let mut back = (height - 1) * MAX_INSTRUCTION_SIZE + LOOKBACK_SLACK;
    loop {
        let low = window_low(pc, back);
        let addrs: Vec<u16> = boundaries(mem, low, pc)
            .await?
            .into_iter()
            .filter(|&a| a <= pc)
            .collect();

        if addrs.last() == Some(&pc) {
            if addrs.len() >= height {
                let start = addrs[addrs.len() - height];
                tracing::debug!(pc, height, low, start, "pc placed on bottom row");
                return Ok(start);
            }
            if low == 0 {
                return Ok(addrs[0]);
            }
        } else if low == 0 {
            tracing::debug!(pc, "pc is not an instruction boundary");
            return Ok(pc);
        }
        back *= 2;
    }
}

/// Start address of the last full view: the one whose bottom row is the
/// final instruction before 0x10000.
///
/// There is no fixed target to land on, so a window is accepted once a
/// wider window agrees on the same start (or the window reaches 0).
pub async fn find_end_start<M>(mem: &M, height: usize) -> Result<u16>
where
    M: MemorySource + ?Sized,
{
    let height = height.max(1);
    let mut back = height * MAX_INSTRUCTION_SIZE + LOOKBACK_SLACK;
    let mut previous: Option<u16> = None;

    loop {
        let low = ADDRESS_SPACE.saturating_sub(back) as u16;
        let bytes = mem.read_memory(low, ADDRESS_SPACE - low as usize).await?;
        let addrs: Vec<u16> = decode(low, &bytes).iter().map(|ins| ins.address).collect();

        let full = addrs.len() >= height;
        let start = if full {
            addrs[addrs.len() - height]
        } else {
            addrs.first().copied().unwrap_or(low)
        };

        if low == 0 || (full && previous == Some(start)) {
            tracing::debug!(height, low, start, "end of memory resolved");
            return Ok(start);
        }
        previous = full.then_some(start);
        back *= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigation::testing::FakeMemory;

    fn all_boundaries(mem: &FakeMemory) -> Vec<u16> {
        decode(0, mem.image()).iter().map(|i| i.address).collect()
    }

    #[tokio::test]
    async fn test_prev_start_matches_full_decode() {
        let mem = FakeMemory::with_program();
        let truth = all_boundaries(&mem);

        for addr in 0x1FC0u16..0x2100 {
            let expected = truth.iter().rev().copied().find(|&a| a < addr).unwrap_or(0);
            assert_eq!(
                find_prev_start(&mem, addr).await.unwrap(),
                expected,
                "addr {addr:04X}"
            );
        }
    }

    #[tokio::test]
    async fn test_prev_start_at_zero() {
        let mem = FakeMemory::with_program();
        assert_eq!(find_prev_start(&mem, 0).await.unwrap(), 0);
        assert_eq!(find_prev_start(&mem, 1).await.unwrap(), 0);
        assert_eq!(mem.reads(), 1);
    }

    #[tokio::test]
    async fn test_prev_start_widens_window() {
        let mut image = vec![0xEA; 0x10000];
        for b in &mut image[0x1000..0x1000 + 600] {
            *b = 0xAD;
        }
        let mem = FakeMemory::new(image);

        // 32, 64, 128 and 256 start mid-instruction inside the LDA run
        assert_eq!(find_prev_start(&mem, 0x11C2).await.unwrap(), 0x11BF);
        assert_eq!(mem.reads(), 5);
    }

    #[tokio::test]
    async fn test_prev_start_n() {
        let mem = FakeMemory::with_program();
        let truth = all_boundaries(&mem);
        let pos = truth.iter().position(|&a| a == 0x203C).unwrap();

        for k in [1usize, 5, 19] {
            assert_eq!(
                find_prev_start_n(&mem, 0x203C, k).await.unwrap(),
                truth[pos - k],
                "k={k}"
            );
        }
        assert_eq!(find_prev_start_n(&mem, 0x203C, 0).await.unwrap(), 0x203C);
    }

    #[tokio::test]
    async fn test_prev_start_n_near_zero_returns_earliest() {
        let mem = FakeMemory::new(vec![0xEA; 0x10000]);
        assert_eq!(find_prev_start_n(&mem, 4, 10).await.unwrap(), 0);
        assert_eq!(find_prev_start_n(&mem, 12, 10).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_pc_on_bottom_row() {
        let mem = FakeMemory::with_program();
        let truth = all_boundaries(&mem);
        let height = 10;

        for &pc in truth.iter().filter(|&&a| (0x2030..0x2080).contains(&a)) {
            let start = find_start_with_pc_on_bottom(&mem, pc, height).await.unwrap();
            let bytes = mem.image()[start as usize..start as usize + height * 3].to_vec();
            let rows = decode(start, &bytes);
            assert_eq!(rows[height - 1].address, pc, "pc {pc:04X}");
        }
    }

    #[tokio::test]
    async fn test_pc_on_bottom_near_zero() {
        let mem = FakeMemory::new(vec![0xEA; 0x10000]);
        assert_eq!(find_start_with_pc_on_bottom(&mem, 5, 10).await.unwrap(), 0);
        assert_eq!(find_start_with_pc_on_bottom(&mem, 0, 10).await.unwrap(), 0);
        assert_eq!(find_start_with_pc_on_bottom(&mem, 0x40, 1).await.unwrap(), 0x40);
    }

    #[tokio::test]
    async fn test_pc_mid_instruction_falls_back_to_pc() {
        let mut image = vec![0xEA; 0x10000];
        image[0x0100..0x0103].copy_from_slice(&[0xAD, 0x00, 0x20]);
        let mem = FakeMemory::new(image);
        assert_eq!(
            find_start_with_pc_on_bottom(&mem, 0x0101, 4).await.unwrap(),
            0x0101
        );
    }

    #[tokio::test]
    async fn test_end_start() {
        let mem = FakeMemory::new(vec![0xEA; 0x10000]);
        assert_eq!(find_end_start(&mem, 10).await.unwrap(), 0xFFF6);

        let mut image = vec![0xEA; 0x10000];
        image[0xFFFD..].copy_from_slice(&[0x4C, 0x00, 0x20]);
        let mem = FakeMemory::new(image);
        assert_eq!(find_end_start(&mem, 3).await.unwrap(), 0xFFFB);
    }

    #[tokio::test]
    async fn test_read_failure_propagates() {
        let mem = FakeMemory::with_program();
        mem.set_failing(true);
        assert!(find_prev_start(&mem, 0x2000).await.is_err());
        assert!(find_end_start(&mem, 4).await.is_err());
    }
}
