/// Bytecode instruction set for the REPL VM
///
/// This is a stack-based VM with relative jumps, call frames and exception
/// handlers. Operands are little-endian. Strings are encoded as a u32 byte
/// length followed by UTF-8 bytes. Jump offsets are i32 values relative to the
/// first byte after the jump instruction, so a chunk's code can be placed at
/// any offset of an assembled program without relocation.

/// Two-byte magic that starts every compiled chunk and every assembled program
pub const HEADER_MAGIC: &[u8; 2] = b"_H";

/// Opcodes are single bytes (u8) for compact representation
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // Literals
    PushNull = 0x01,
    PushTrue = 0x02,
    PushFalse = 0x03,
    /// Operand: i64
    PushInt = 0x04,
    /// Operand: f64
    PushFloat = 0x05,
    /// Operand: string
    PushString = 0x06,

    /// Pop top value from stack and discard
    Pop = 0x07,

    // Variable operations
    /// Push a copy of a slot relative to the current frame base
    /// Operand: u16 (slot)
    GetLocal = 0x10,

    /// Pop the top of stack into a slot relative to the current frame base
    /// Operand: u16 (slot)
    SetLocal = 0x11,

    /// Like GetLocal, but the slot is absolute (chunk-root scope)
    /// Operand: u16 (slot)
    GetRootLocal = 0x12,

    /// Like SetLocal, but the slot is absolute (chunk-root scope)
    /// Operand: u16 (slot)
    SetRootLocal = 0x13,

    /// Load a host-provided global by name
    /// Operand: string
    GetGlobal = 0x14,

    // Arithmetic operators (binary, pop 2, push 1)
    Add = 0x20, // a + b
    Sub = 0x21, // a - b
    Mul = 0x22, // a * b
    Div = 0x23, // a / b
    Mod = 0x24, // a % b
    Neg = 0x25, // -a (unary)

    // Comparison operators (binary, pop 2, push 1 bool)
    Eq = 0x30, // a == b
    Ne = 0x31, // a != b
    Lt = 0x32, // a < b
    Gt = 0x33, // a > b
    Le = 0x34, // a <= b
    Ge = 0x35, // a >= b

    // Logical operators
    And = 0x40, // a && b (binary, pop 2, push 1)
    Or = 0x41,  // a || b (binary, pop 2, push 1)
    Not = 0x42, // !a (unary, pop 1, push 1)

    // Containers
    /// Stack: [obj, key] -> [value]
    GetItem = 0x50,

    /// Stack: [obj, key, value] -> [updated obj]
    SetItem = 0x51,

    /// Operand: u16 (element count)
    /// Stack: [a0, ..., aN] -> [array]
    NewArray = 0x52,

    /// Operand: u16 (pair count)
    /// Stack: [k0, v0, ..., kN, vN] -> [object]
    NewDict = 0x53,

    // Control flow
    /// Operand: i32 (relative offset)
    Jump = 0x60,

    /// Pops the condition, jumps when it is falsy
    /// Operand: i32 (relative offset)
    JumpIfFalse = 0x61,

    // Functions
    /// Call a declared function, built-in or host capability
    /// Operands: string (name), u8 (arg count)
    /// Stack: [arg0, arg1, ..., argN] -> [result]
    CallGlobal = 0x70,

    /// Return from the current frame with the top of stack
    Return = 0x71,

    /// Register a function whose body follows inline, then skip the body
    /// Operands: string (name), u8 (arg count), u32 (body length)
    DeclareFn = 0x72,

    /// End the chunk early with the top of stack as its result, keeping only
    /// the chunk-root slots bound so far
    /// Operand: u16 (bound slot count)
    ReturnChunk = 0x73,

    // Exceptions
    /// Install a handler; the catch block starts at the relative offset
    /// Operand: i32 (relative offset)
    Try = 0x80,

    /// Remove the innermost handler
    PopTry = 0x81,

    /// Raise the top of stack as an exception
    Throw = 0x82,
}

impl Opcode {
    /// Try to parse a u8 into an Opcode
    pub fn from_u8(byte: u8) -> Result<Self, String> {
        match byte {
            0x01 => Ok(Opcode::PushNull),
            0x02 => Ok(Opcode::PushTrue),
            0x03 => Ok(Opcode::PushFalse),
            0x04 => Ok(Opcode::PushInt),
            0x05 => Ok(Opcode::PushFloat),
            0x06 => Ok(Opcode::PushString),
            0x07 => Ok(Opcode::Pop),
            0x10 => Ok(Opcode::GetLocal),
            0x11 => Ok(Opcode::SetLocal),
            0x12 => Ok(Opcode::GetRootLocal),
            0x13 => Ok(Opcode::SetRootLocal),
            0x14 => Ok(Opcode::GetGlobal),
            0x20 => Ok(Opcode::Add),
            0x21 => Ok(Opcode::Sub),
            0x22 => Ok(Opcode::Mul),
            0x23 => Ok(Opcode::Div),
            0x24 => Ok(Opcode::Mod),
            0x25 => Ok(Opcode::Neg),
            0x30 => Ok(Opcode::Eq),
            0x31 => Ok(Opcode::Ne),
            0x32 => Ok(Opcode::Lt),
            0x33 => Ok(Opcode::Gt),
            0x34 => Ok(Opcode::Le),
            0x35 => Ok(Opcode::Ge),
            0x40 => Ok(Opcode::And),
            0x41 => Ok(Opcode::Or),
            0x42 => Ok(Opcode::Not),
            0x50 => Ok(Opcode::GetItem),
            0x51 => Ok(Opcode::SetItem),
            0x52 => Ok(Opcode::NewArray),
            0x53 => Ok(Opcode::NewDict),
            0x60 => Ok(Opcode::Jump),
            0x61 => Ok(Opcode::JumpIfFalse),
            0x70 => Ok(Opcode::CallGlobal),
            0x71 => Ok(Opcode::Return),
            0x72 => Ok(Opcode::DeclareFn),
            0x73 => Ok(Opcode::ReturnChunk),
            0x80 => Ok(Opcode::Try),
            0x81 => Ok(Opcode::PopTry),
            0x82 => Ok(Opcode::Throw),
            _ => Err(format!("Unknown opcode: 0x{:02x}", byte)),
        }
    }

    /// Returns the number of fixed-size operand bytes this opcode requires.
    /// Opcodes carrying a string report only the bytes that follow the string.
    pub fn operand_size(&self) -> usize {
        match self {
            Opcode::PushInt | Opcode::PushFloat => 8,
            Opcode::GetLocal
            | Opcode::SetLocal
            | Opcode::GetRootLocal
            | Opcode::SetRootLocal
            | Opcode::NewArray
            | Opcode::NewDict
            | Opcode::ReturnChunk => 2,
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::Try => 4,
            Opcode::CallGlobal => 1,
            Opcode::DeclareFn => 5,
            _ => 0,
        }
    }

    /// Whether the first operand is a length-prefixed string
    pub fn has_string_operand(&self) -> bool {
        matches!(
            self,
            Opcode::PushString | Opcode::GetGlobal | Opcode::CallGlobal | Opcode::DeclareFn
        )
    }
}

/// Length in bytes of the instruction starting at `offset`.
///
/// `DeclareFn` reports only its own header; its body is a run of ordinary
/// instructions that directly follows.
pub fn instruction_len(bytecode: &[u8], offset: usize) -> Result<usize, String> {
    let opcode = Opcode::from_u8(read_u8(bytecode, offset)?)?;
    let mut len = 1;
    if opcode.has_string_operand() {
        let str_len = read_u32(bytecode, offset + len)? as usize;
        len += 4 + str_len;
    }
    len += opcode.operand_size();
    if offset + len > bytecode.len() {
        return Err(format!("Truncated {:?} instruction at offset {}", opcode, offset));
    }
    Ok(len)
}

/// Offset of the last instruction in `bytecode`, or None when it is empty
pub fn last_instruction_offset(bytecode: &[u8]) -> Result<Option<usize>, String> {
    let mut offset = 0;
    let mut last = None;
    while offset < bytecode.len() {
        last = Some(offset);
        offset += instruction_len(bytecode, offset)?;
    }
    Ok(last)
}

/// Helper to read a u8 from bytecode
#[inline]
pub fn read_u8(bytecode: &[u8], offset: usize) -> Result<u8, String> {
    bytecode
        .get(offset)
        .copied()
        .ok_or_else(|| "Unexpected end of bytecode while reading u8".to_string())
}

/// Helper to read a u16 from bytecode in little-endian format
#[inline]
pub fn read_u16(bytecode: &[u8], offset: usize) -> Result<u16, String> {
    let bytes = read_array::<2>(bytecode, offset, "u16")?;
    Ok(u16::from_le_bytes(bytes))
}

/// Helper to read a u32 from bytecode in little-endian format
#[inline]
pub fn read_u32(bytecode: &[u8], offset: usize) -> Result<u32, String> {
    let bytes = read_array::<4>(bytecode, offset, "u32")?;
    Ok(u32::from_le_bytes(bytes))
}

/// Helper to read an i32 from bytecode in little-endian format
#[inline]
pub fn read_i32(bytecode: &[u8], offset: usize) -> Result<i32, String> {
    let bytes = read_array::<4>(bytecode, offset, "i32")?;
    Ok(i32::from_le_bytes(bytes))
}

/// Helper to read an i64 from bytecode in little-endian format
#[inline]
pub fn read_i64(bytecode: &[u8], offset: usize) -> Result<i64, String> {
    let bytes = read_array::<8>(bytecode, offset, "i64")?;
    Ok(i64::from_le_bytes(bytes))
}

/// Helper to read an f64 from bytecode in little-endian format
#[inline]
pub fn read_f64(bytecode: &[u8], offset: usize) -> Result<f64, String> {
    let bytes = read_array::<8>(bytecode, offset, "f64")?;
    Ok(f64::from_le_bytes(bytes))
}

/// Helper to read a length-prefixed UTF-8 string. Returns the string and the
/// number of bytes consumed.
pub fn read_string(bytecode: &[u8], offset: usize) -> Result<(&str, usize), String> {
    let len = read_u32(bytecode, offset)? as usize;
    let start = offset + 4;
    let bytes = bytecode
        .get(start..start + len)
        .ok_or_else(|| "Unexpected end of bytecode while reading string".to_string())?;
    let s = std::str::from_utf8(bytes).map_err(|e| format!("Invalid UTF-8 in bytecode string: {}", e))?;
    Ok((s, 4 + len))
}

fn read_array<const N: usize>(bytecode: &[u8], offset: usize, what: &str) -> Result<[u8; N], String> {
    bytecode
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| format!("Unexpected end of bytecode while reading {}", what))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        let opcodes = [
            Opcode::PushInt,
            Opcode::Add,
            Opcode::CallGlobal,
            Opcode::DeclareFn,
            Opcode::Throw,
        ];

        for opcode in opcodes {
            let byte = opcode as u8;
            let parsed = Opcode::from_u8(byte).unwrap();
            assert_eq!(opcode, parsed);
        }
    }

    #[test]
    fn test_invalid_opcode() {
        assert!(Opcode::from_u8(0xFF).is_err());
    }

    #[test]
    fn test_instruction_len_with_string_operand() {
        // CallGlobal "print" argc=1
        let mut bytes = vec![Opcode::CallGlobal as u8];
        bytes.extend_from_slice(&5u32.to_le_bytes());
        bytes.extend_from_slice(b"print");
        bytes.push(1);

        assert_eq!(instruction_len(&bytes, 0).unwrap(), 1 + 4 + 5 + 1);
        assert!(instruction_len(&bytes[..bytes.len() - 1], 0).is_err());
    }

    #[test]
    fn test_last_instruction_ignores_operand_bytes() {
        // PushInt 7 has Pop's byte value as its last operand byte
        let mut bytes = vec![Opcode::PushInt as u8];
        bytes.extend_from_slice(&((Opcode::Pop as i64) << 56).to_le_bytes());

        assert_eq!(*bytes.last().unwrap(), Opcode::Pop as u8);
        assert_eq!(last_instruction_offset(&bytes).unwrap(), Some(0));
        assert_eq!(last_instruction_offset(&[]).unwrap(), None);
    }

    #[test]
    fn test_read_helpers() {
        let bytes = [0x34, 0x12, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(read_u16(&bytes, 0).unwrap(), 0x1234);
        assert_eq!(read_i32(&bytes, 2).unwrap(), -1);
        assert!(read_u32(&bytes, 4).is_err());
    }
}
