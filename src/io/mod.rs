mod range_reader;
mod s3_reader;
mod store;

pub use range_reader::{MemoryRangeReader, RangeReader};
pub use s3_reader::{create_s3_client, S3RangeReader};
pub use store::{read_object, MemoryObjectStore, ObjectStore, S3ObjectStore};
