//! Virtual address type for the debuggee's address space.

use std::fmt;
use std::ops::Add;

/// Virtual address inside the traced process
///
/// Symbol values, line-table rows, breakpoint locations and the instruction
/// pointer all live in the same address space. For non-PIE executables the
/// link-time addresses recorded in `.symtab` and `.debug_line` are also the
/// run-time addresses, so no relocation is applied anywhere in the engine.
///
/// ## Example
///
/// ```rust
/// use rdb_core::types::Address;
///
/// let main = Address::from(0x401136);
/// assert_eq!((main + 4).value(), 0x40113a);
/// assert_eq!(main.to_string(), "0x0000000000401136");
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address, used for "no instruction pointer recorded"
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value (usable in const contexts)
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Subtract an offset, returning `None` on underflow
    ///
    /// Used when rewinding the instruction pointer past a trap byte.
    pub fn checked_sub(self, offset: u64) -> Option<Self>
    {
        self.0.checked_sub(offset).map(Address)
    }

    /// Whether this is the null address
    pub const fn is_zero(self) -> bool
    {
        self.0 == 0
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl fmt::LowerHex for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}
