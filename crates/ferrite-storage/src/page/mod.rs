//! Page layout and typed page views.

mod array_page;
mod checksum;
mod header;

pub use array_page::{
    child_index, child_span, levels_for, records_per_leaf, InteriorBuilder, InteriorView,
    LeafBuilder, LeafView, INTERIOR_FANOUT,
};
pub(crate) use array_page::leaf_slot_range;
pub use checksum::{compute_checksum, compute_page_checksum, verify_checksum};
pub use header::{PageHeader, PageType, CHECKSUM_OFFSET, PAGE_HEADER_SIZE, PAGE_MAGIC};
