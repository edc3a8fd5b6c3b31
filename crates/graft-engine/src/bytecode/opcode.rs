//! Instruction opcodes
//!
//! Opcodes are organized into categories:
//! - 0x00-0x0F: Stack manipulation & constants
//! - 0x10-0x1F: Arguments, locals and indirection
//! - 0x20-0x2F: Arithmetic
//! - 0x50-0x5F: Comparison
//! - 0x90-0x9F: Control flow
//! - 0xA0-0xAF: Calls
//! - 0xB0-0xBF: Object and field operations
//! - 0xE0-0xEF: Exceptions

/// Opcode enumeration
///
/// Every instruction starts with one opcode byte; operands follow inline and
/// are described on [`crate::bytecode::Instruction`].
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // ===== Stack Manipulation & Constants (0x00-0x0F) =====
    /// No operation
    Nop = 0x00,
    /// Pop top value from stack
    Pop = 0x01,
    /// Duplicate top stack value
    Dup = 0x02,
    /// Push null
    LoadNull = 0x04,
    /// Push 32-bit integer (operand: i32)
    LoadI4 = 0x05,
    /// Push 64-bit integer (operand: i64)
    LoadI8 = 0x06,
    /// Push 32-bit float (operand: f32)
    LoadR4 = 0x07,
    /// Push 64-bit float (operand: f64)
    LoadR8 = 0x08,
    /// Push string (operand: string)
    LoadStr = 0x09,
    /// Push a runtime type handle (operand: type signature)
    LoadToken = 0x0A,

    // ===== Arguments, Locals & Indirection (0x10-0x1F) =====
    /// Push argument (operand: u16 index)
    LoadArg = 0x10,
    /// Store to argument (operand: u16 index)
    StoreArg = 0x11,
    /// Push local (operand: u16 index)
    LoadLocal = 0x12,
    /// Store to local (operand: u16 index)
    StoreLocal = 0x13,
    /// Pop address, push the value it points to (operand: type signature)
    LoadIndirect = 0x14,
    /// Pop value, pop address, store value through address (operand: type signature)
    StoreIndirect = 0x15,

    // ===== Arithmetic (0x20-0x2F) =====
    /// pop b, pop a, push a + b
    Add = 0x20,
    /// pop b, pop a, push a - b
    Sub = 0x21,

    // ===== Comparison (0x50-0x5F) =====
    /// pop b, pop a, push a == b
    Ceq = 0x50,
    /// pop b, pop a, push a < b
    Clt = 0x51,

    // ===== Control Flow (0x90-0x9F) =====
    /// Unconditional branch (operand: u32 instruction index)
    Br = 0x90,
    /// Branch if top of stack is true/non-null (operand: u32 instruction index)
    BrTrue = 0x91,
    /// Branch if top of stack is false/null (operand: u32 instruction index)
    BrFalse = 0x92,
    /// Return from method
    Ret = 0x9F,

    // ===== Calls (0xA0-0xAF) =====
    /// Static dispatch call (operand: method reference)
    Call = 0xA0,
    /// Virtual dispatch call (operand: method reference)
    CallVirt = 0xA1,

    // ===== Objects & Fields (0xB0-0xBF) =====
    /// Allocate and construct an object (operand: constructor reference)
    NewObj = 0xB0,
    /// Pop instance, push field value (operand: field reference)
    LoadField = 0xB1,
    /// Pop instance, push field address (operand: field reference)
    LoadFieldAddr = 0xB2,
    /// Pop value, pop instance, store field (operand: field reference)
    StoreField = 0xB3,
    /// Checked cast (operand: type signature)
    CastClass = 0xB4,
    /// Type test: push the instance if compatible, null otherwise (operand: type signature)
    IsInst = 0xB5,

    // ===== Exceptions (0xE0-0xEF) =====
    /// Throw the object on top of the stack
    Throw = 0xE0,
}

impl Opcode {
    /// Convert a byte to an opcode
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Nop),
            0x01 => Some(Self::Pop),
            0x02 => Some(Self::Dup),
            0x04 => Some(Self::LoadNull),
            0x05 => Some(Self::LoadI4),
            0x06 => Some(Self::LoadI8),
            0x07 => Some(Self::LoadR4),
            0x08 => Some(Self::LoadR8),
            0x09 => Some(Self::LoadStr),
            0x0A => Some(Self::LoadToken),

            0x10 => Some(Self::LoadArg),
            0x11 => Some(Self::StoreArg),
            0x12 => Some(Self::LoadLocal),
            0x13 => Some(Self::StoreLocal),
            0x14 => Some(Self::LoadIndirect),
            0x15 => Some(Self::StoreIndirect),

            0x20 => Some(Self::Add),
            0x21 => Some(Self::Sub),

            0x50 => Some(Self::Ceq),
            0x51 => Some(Self::Clt),

            0x90 => Some(Self::Br),
            0x91 => Some(Self::BrTrue),
            0x92 => Some(Self::BrFalse),
            0x9F => Some(Self::Ret),

            0xA0 => Some(Self::Call),
            0xA1 => Some(Self::CallVirt),

            0xB0 => Some(Self::NewObj),
            0xB1 => Some(Self::LoadField),
            0xB2 => Some(Self::LoadFieldAddr),
            0xB3 => Some(Self::StoreField),
            0xB4 => Some(Self::CastClass),
            0xB5 => Some(Self::IsInst),

            0xE0 => Some(Self::Throw),

            _ => None,
        }
    }

    /// Convert the opcode to its byte value
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Get the human-readable name of the opcode
    pub fn name(self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::LoadNull => "LDNULL",
            Self::LoadI4 => "LDC_I4",
            Self::LoadI8 => "LDC_I8",
            Self::LoadR4 => "LDC_R4",
            Self::LoadR8 => "LDC_R8",
            Self::LoadStr => "LDSTR",
            Self::LoadToken => "LDTOKEN",
            Self::LoadArg => "LDARG",
            Self::StoreArg => "STARG",
            Self::LoadLocal => "LDLOC",
            Self::StoreLocal => "STLOC",
            Self::LoadIndirect => "LDIND",
            Self::StoreIndirect => "STIND",
            Self::Add => "ADD",
            Self::Sub => "SUB",
            Self::Ceq => "CEQ",
            Self::Clt => "CLT",
            Self::Br => "BR",
            Self::BrTrue => "BRTRUE",
            Self::BrFalse => "BRFALSE",
            Self::Ret => "RET",
            Self::Call => "CALL",
            Self::CallVirt => "CALLVIRT",
            Self::NewObj => "NEWOBJ",
            Self::LoadField => "LDFLD",
            Self::LoadFieldAddr => "LDFLDA",
            Self::StoreField => "STFLD",
            Self::CastClass => "CASTCLASS",
            Self::IsInst => "ISINST",
            Self::Throw => "THROW",
        }
    }

    /// Check if this opcode is a branch
    pub fn is_branch(self) -> bool {
        matches!(self, Self::Br | Self::BrTrue | Self::BrFalse)
    }

    /// Check if this opcode is a call instruction
    pub fn is_call(self) -> bool {
        matches!(self, Self::Call | Self::CallVirt | Self::NewObj)
    }

    /// Check if this opcode returns from the method
    pub fn is_return(self) -> bool {
        matches!(self, Self::Ret)
    }

    /// Check if control never falls through to the next instruction
    pub fn is_terminator(self) -> bool {
        matches!(self, Self::Br | Self::Ret | Self::Throw)
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_byte_conversion() {
        for byte in 0..=u8::MAX {
            if let Some(opcode) = Opcode::from_u8(byte) {
                assert_eq!(opcode.to_u8(), byte, "{} does not map back", opcode);
            }
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert_eq!(Opcode::from_u8(0x03), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
    }

    #[test]
    fn test_terminator_detection() {
        assert!(Opcode::Ret.is_terminator());
        assert!(Opcode::Br.is_terminator());
        assert!(Opcode::Throw.is_terminator());
        assert!(!Opcode::BrTrue.is_terminator());
        assert!(!Opcode::Call.is_terminator());
    }

    #[test]
    fn test_opcode_values() {
        assert_eq!(Opcode::Nop as u8, 0x00);
        assert_eq!(Opcode::LoadArg as u8, 0x10);
        assert_eq!(Opcode::Ret as u8, 0x9F);
        assert_eq!(Opcode::LoadField as u8, 0xB1);
    }
}
