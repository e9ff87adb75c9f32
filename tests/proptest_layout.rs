//! Property tests for partition layout computation and MBR writes

use proptest::prelude::*;
use storage_helper::partition::write_entry;
use storage_helper::{HeapBlockDevice, LayoutError, PartitionSpec, PartitionTable, StorageConfig};

const SECTOR: u64 = 512;

fn config(primary: u64, secondary: Option<u64>) -> StorageConfig {
    let primary = PartitionSpec::primary(primary);
    let secondary = secondary.map(|size| PartitionSpec::secondary(&primary, size));
    StorageConfig::partitioned(primary, secondary)
}

proptest! {
    #[test]
    fn layout_fits_or_reports_capacity(
        primary in 4096u64..(8 << 20),
        secondary in proptest::option::of(4096u64..(8 << 20)),
        capacity in 0u64..(20 << 20),
    ) {
        let config = config(primary, secondary);
        let required = primary + secondary.unwrap_or(0);

        match config.layout(capacity, SECTOR as usize) {
            Err(LayoutError::InsufficientCapacity { required: r, available }) => {
                prop_assert_eq!(r, required);
                prop_assert_eq!(available, capacity);
                prop_assert!(capacity < required);
            }
            Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            Ok(extents) => {
                prop_assert!(capacity >= required);
                prop_assert_eq!(extents.len(), config.partitions().len());
                for extent in &extents {
                    prop_assert!(extent.start_lba >= 1);
                    prop_assert!(extent.blocks > 0);
                    prop_assert!(extent.end_lba() <= capacity / SECTOR);
                }
                if let [first, second] = extents.as_slice() {
                    prop_assert!(!first.overlaps(second));
                    prop_assert!(first.end_lba() <= second.start_lba);
                }
            }
        }
    }

    #[test]
    fn written_layout_reads_back(
        primary_sectors in 8u64..2048,
        secondary_sectors in 8u64..2048,
    ) {
        let config = config(primary_sectors * SECTOR, Some(secondary_sectors * SECTOR));
        let capacity = config.required_capacity();
        let mut dev = HeapBlockDevice::new(SECTOR as usize, capacity / SECTOR);

        let extents = config.layout(capacity, SECTOR as usize).unwrap();
        for (spec, extent) in config.partitions().iter().zip(&extents) {
            write_entry(&mut dev, spec.number, spec.part_type, *extent).unwrap();
        }

        let entries = PartitionTable::read(&mut dev).unwrap().entries();
        prop_assert_eq!(entries.len(), 2);
        for (entry, extent) in entries.iter().zip(&extents) {
            prop_assert_eq!(entry.extent(), *extent);
        }
    }
}
