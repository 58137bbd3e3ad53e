pub mod batched_array;
pub mod delegate;
mod dispatch;
pub mod indexed_array;
pub mod ordered_array;

pub use batched_array::BatchedArray;
pub use delegate::{
    ArrayDelegate, BatchedArrayDelegate, EventSender, EventSink, IndexedArrayDelegate,
    dispatch_array_event, dispatch_batched_event, dispatch_indexed_event, event_channel,
};
pub use indexed_array::{IndexedArray, LoadState};
pub use ordered_array::{Comparator, OrderedArray};
