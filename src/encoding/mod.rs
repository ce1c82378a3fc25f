//! Binary codec primitives shared by every page encoding: the elastic byte
//! buffer, LEB128 varints, and the fixed-width bit set.

mod bitset;
mod buffer;
pub mod varint;

pub use bitset::BitSet;
pub use buffer::ByteBuf;
pub use varint::{get_var_i64, get_var_u64, put_var_i64, put_var_u64, var_u64_len};
