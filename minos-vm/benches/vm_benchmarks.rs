//! Demand paging benchmarks: fault-in throughput, resident fast path, and
//! swap thrash under a deliberately undersized frame pool.

use std::collections::HashMap;
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use minos_api::{
    FaultKind, HardwareSpace, PhysAddr, Result, SwapDisk, VirtAddr, PAGE_SIZE, SECTOR_SIZE,
};
use minos_vm::{AddressSpace, FirstTouch, TargetKind, Vm, VmPolicy};
use spin::Mutex;

const BASE: usize = 0x1000_0000;

struct BenchHw {
    maps: Mutex<HashMap<VirtAddr, PhysAddr>>,
}

impl HardwareSpace for BenchHw {
    fn map(&self, va: VirtAddr, pa: PhysAddr, _writable: bool) -> Result<()> {
        self.maps.lock().insert(va, pa);
        Ok(())
    }

    fn unmap(&self, va: VirtAddr) {
        self.maps.lock().remove(&va);
    }

    fn is_dirty(&self, _va: VirtAddr) -> bool {
        false
    }

    fn clear_dirty(&self, _va: VirtAddr) {}

    fn probe(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.maps.lock().get(&va).copied()
    }
}

struct BenchDisk {
    sectors: Mutex<Vec<u8>>,
    count: usize,
}

impl SwapDisk for BenchDisk {
    fn read_sector(&self, index: usize, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        let sectors = self.sectors.lock();
        buf.copy_from_slice(&sectors[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE]);
        Ok(())
    }

    fn write_sector(&self, index: usize, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        let mut sectors = self.sectors.lock();
        sectors[index * SECTOR_SIZE..(index + 1) * SECTOR_SIZE].copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> usize {
        self.count
    }
}

fn bench_vm(frames: usize, swap_sectors: usize) -> (Vm, AddressSpace) {
    let disk: Arc<dyn SwapDisk> = Arc::new(BenchDisk {
        sectors: Mutex::new(vec![0u8; swap_sectors * SECTOR_SIZE]),
        count: swap_sectors,
    });
    let vm = Vm::new(frames, disk, VmPolicy::default());
    let hw = Arc::new(BenchHw {
        maps: Mutex::new(HashMap::new()),
    });
    let space = vm.create_space(hw);
    (vm, space)
}

fn register_pages(vm: &Vm, space: &mut AddressSpace, pages: usize) {
    for n in 0..pages {
        vm.allocate_lazy_page(
            space,
            TargetKind::Anon,
            VirtAddr::new(BASE + n * PAGE_SIZE),
            true,
            FirstTouch::ZeroFill,
        )
        .unwrap();
    }
}

fn fault_in_pages(c: &mut Criterion) {
    c.bench_function("fault_in_128_zero_pages", |b| {
        b.iter_batched(
            || {
                let (vm, mut space) = bench_vm(256, 2048);
                register_pages(&vm, &mut space, 128);
                (vm, space)
            },
            |(vm, mut space)| {
                for n in 0..128 {
                    vm.handle_page_fault(
                        &mut space,
                        VirtAddr::new(BASE + n * PAGE_SIZE),
                        FaultKind::USER,
                        VirtAddr::new(BASE),
                    )
                    .unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

fn resident_fast_path(c: &mut Criterion) {
    let (vm, mut space) = bench_vm(8, 256);
    register_pages(&vm, &mut space, 1);
    vm.claim_resident(&space, VirtAddr::new(BASE)).unwrap();

    c.bench_function("claim_already_resident", |b| {
        b.iter(|| vm.claim_resident(&space, VirtAddr::new(BASE)).unwrap())
    });
}

fn swap_thrash(c: &mut Criterion) {
    c.bench_function("thrash_64_pages_through_16_frames", |b| {
        b.iter_batched(
            || {
                let (vm, mut space) = bench_vm(16, 2048);
                register_pages(&vm, &mut space, 64);
                (vm, space)
            },
            |(vm, space)| {
                for n in 0..64 {
                    vm.claim_resident(&space, VirtAddr::new(BASE + n * PAGE_SIZE))
                        .unwrap();
                }
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, fault_in_pages, resident_fast_path, swap_thrash);
criterion_main!(benches);
