use ahash::AHashSet;
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use rand::{rngs::SmallRng, Rng, SeedableRng};

use map_core::{find_clusters, Cell, CoreState, OwnerComponents, TileGrid};

/// Grid with `fill_permille` of cells owned, split across four factions,
/// a live core seeded per faction.
fn populated_grid(size: u32, fill_permille: u32) -> TileGrid {
    let grid = TileGrid::new(size);
    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    for y in 0..size {
        for x in 0..size {
            if rng.gen_range(0..1_000) >= fill_permille {
                continue;
            }
            let mut cell = Cell::empty();
            cell.faction = Some(rng.gen_range(1..=4));
            grid.write_cell(x, y, &cell);
        }
    }
    for faction in 1..=4u16 {
        let x = u32::from(faction) * (size / 5);
        let mut cell = Cell::empty();
        cell.faction = Some(faction);
        cell.set_core_state(CoreState::Core { expiry_ms: None });
        grid.write_cell(x, size / 2, &cell);
    }
    grid
}

fn bench_clusters(c: &mut Criterion) {
    let mut group = c.benchmark_group("flood_fill");

    for size in [100u32, 250, 500] {
        group.bench_with_input(BenchmarkId::new("find_clusters", size), &size, |b, &size| {
            b.iter_batched(
                || populated_grid(size, 400),
                |grid| find_clusters(&grid, 1, &AHashSet::new(), &[], 0.0),
                BatchSize::SmallInput,
            )
        });

        group.bench_with_input(
            BenchmarkId::new("owner_components", size),
            &size,
            |b, &size| {
                b.iter_batched(
                    || populated_grid(size, 400),
                    |grid| OwnerComponents::build(&grid),
                    BatchSize::SmallInput,
                )
            },
        );
    }

    group.finish();
}

criterion_group!(flood_fill_benches, bench_clusters);
criterion_main!(flood_fill_benches);
