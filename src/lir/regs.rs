use core::fmt;

/// The kind of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegKind {
    /// The general purpose register.
    General,
    /// The floating point register.
    Float,
    /// The vector register.
    Vector,
}

/// The physical register.
///
/// Just the register number and the kind, the target decides what the number
/// means.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PReg(u8, RegKind);

impl PReg {
    pub const fn new(num: u8, kind: RegKind) -> Self { Self(num, kind) }

    pub const fn num(&self) -> u8 { self.0 }

    pub const fn kind(&self) -> RegKind { self.1 }
}

/// The virtual register.
///
/// Virtual registers are ordered by number, which is also their creation
/// order in the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u32, RegKind);

impl VReg {
    pub fn new(num: u32, kind: RegKind) -> Self { Self(num, kind) }

    pub fn num(&self) -> u32 { self.0 }

    pub fn kind(&self) -> RegKind { self.1 }
}

/// A slot in the stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StackSlot {
    /// A spill slot in the frame of the current function.
    Local(u32),
    /// An argument passed on the stack, living in the caller's frame.
    Incoming(u32),
}

impl StackSlot {
    pub fn is_incoming(&self) -> bool { matches!(self, StackSlot::Incoming(_)) }
}

/// The final location of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    Reg(PReg),
    Stack(StackSlot),
}

impl Location {
    pub fn is_reg(&self) -> bool { matches!(self, Location::Reg(_)) }

    pub fn is_stack(&self) -> bool { matches!(self, Location::Stack(_)) }

    pub fn as_reg(&self) -> Option<PReg> {
        match self {
            Location::Reg(preg) => Some(*preg),
            Location::Stack(_) => None,
        }
    }
}

impl From<PReg> for Location {
    fn from(preg: PReg) -> Self { Self::Reg(preg) }
}

impl From<StackSlot> for Location {
    fn from(slot: StackSlot) -> Self { Self::Stack(slot) }
}

impl fmt::Display for PReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            match self.1 {
                RegKind::General => "%r",
                RegKind::Float => "%f",
                RegKind::Vector => "%v",
            },
            self.0
        )
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}",
            match self.1 {
                RegKind::General => "$r",
                RegKind::Float => "$f",
                RegKind::Vector => "$v",
            },
            self.0
        )
    }
}

impl fmt::Display for StackSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackSlot::Local(idx) => write!(f, "stack:{}", idx),
            StackSlot::Incoming(idx) => write!(f, "in:{}", idx),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Reg(preg) => write!(f, "{}", preg),
            Location::Stack(slot) => write!(f, "{}", slot),
        }
    }
}
