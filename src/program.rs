use crate::opcodes::{self, Opcode, HEADER_MAGIC};
use crate::BYTECODE_VERSION;
use tracing::debug;

/// Bytes every compiled chunk and assembled program starts with
pub fn header() -> [u8; 3] {
    [HEADER_MAGIC[0], HEADER_MAGIC[1], BYTECODE_VERSION]
}

/// Validate and remove the header+version prefix from compiler output
pub fn strip_header(bytecode: &[u8]) -> Result<&[u8], String> {
    match bytecode {
        [m0, m1, version, rest @ ..] if [*m0, *m1] == *HEADER_MAGIC => {
            if *version != BYTECODE_VERSION {
                return Err(format!(
                    "Unsupported bytecode version {} (expected {})",
                    version, BYTECODE_VERSION
                ));
            }
            Ok(rest)
        }
        _ => Err("Invalid bytecode: missing header".to_string()),
    }
}

/// An assembled, executable program
///
/// Consists of the header prefix, the instruction bytes of every successful
/// chunk in session order, then the bytes of the chunk being evaluated. The
/// entry offset is where the new chunk's code begins. Programs are values: a
/// new one is assembled for every evaluation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    bytes: Vec<u8>,
    entry: usize,
}

impl Program {
    /// Assembled bytes, header included
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Offset at which the newest chunk's code begins
    pub fn entry(&self) -> usize {
        self.entry
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds programs from a chunk history
pub struct ProgramAssembler;

impl ProgramAssembler {
    /// Assemble a program from the header-less bytes of prior successful chunks
    /// (in chunk order) and the header-less bytes of the new chunk.
    ///
    /// When the new chunk's last instruction is `Pop`, it is dropped so the value
    /// of the final expression stays on the stack as the chunk's result.
    pub fn assemble<'a, I>(prior: I, chunk: &[u8]) -> Result<Program, String>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut bytes = header().to_vec();
        for prior_chunk in prior {
            bytes.extend_from_slice(prior_chunk);
        }
        let entry = bytes.len();

        let keep = match opcodes::last_instruction_offset(chunk)? {
            Some(last) if chunk[last] == Opcode::Pop as u8 => last,
            _ => chunk.len(),
        };
        bytes.extend_from_slice(&chunk[..keep]);

        debug!(
            entry,
            len = bytes.len(),
            trimmed_pop = keep != chunk.len(),
            "Assembled program"
        );

        Ok(Program { bytes, entry })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_int(value: i64) -> Vec<u8> {
        let mut bytes = vec![Opcode::PushInt as u8];
        bytes.extend_from_slice(&value.to_le_bytes());
        bytes
    }

    #[test]
    fn test_strip_header() {
        let mut compiled = header().to_vec();
        compiled.extend(push_int(1));

        assert_eq!(strip_header(&compiled).unwrap(), push_int(1).as_slice());
        assert!(strip_header(&[b'_', b'H']).is_err());
        assert!(strip_header(&[b'_', b'H', 99, 0x01]).is_err());
        assert!(strip_header(&[0x01, 0x02, 0x03]).is_err());
    }

    #[test]
    fn test_assemble_entry_offset() {
        let first = push_int(1);
        let second = push_int(2);
        let mut new_chunk = push_int(3);
        new_chunk.push(Opcode::Pop as u8);

        let program =
            ProgramAssembler::assemble([first.as_slice(), second.as_slice()], &new_chunk).unwrap();

        assert_eq!(program.entry(), 3 + first.len() + second.len());
        assert_eq!(&program.bytes()[..3], &header());
        // trailing Pop removed
        assert_eq!(&program.bytes()[program.entry()..], push_int(3).as_slice());
    }

    #[test]
    fn test_prior_chunks_keep_their_pop() {
        let mut prior = push_int(1);
        prior.push(Opcode::Pop as u8);
        let new_chunk = push_int(2);

        let program = ProgramAssembler::assemble([prior.as_slice()], &new_chunk).unwrap();
        assert_eq!(program.bytes()[program.entry() - 1], Opcode::Pop as u8);
        assert_eq!(program.len(), 3 + prior.len() + new_chunk.len());
    }

    #[test]
    fn test_operand_byte_is_not_mistaken_for_pop() {
        let new_chunk = push_int((Opcode::Pop as i64) << 56);
        let program = ProgramAssembler::assemble(std::iter::empty(), &new_chunk).unwrap();
        assert_eq!(&program.bytes()[program.entry()..], new_chunk.as_slice());
    }

    #[test]
    fn test_assembly_is_deterministic() {
        let chunks = [push_int(1), push_int(2)];
        let new_chunk = push_int(3);

        let a = ProgramAssembler::assemble(chunks.iter().map(Vec::as_slice), &new_chunk).unwrap();
        let b = ProgramAssembler::assemble(chunks.iter().map(Vec::as_slice), &new_chunk).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_malformed_chunk_is_rejected() {
        let truncated = vec![Opcode::PushInt as u8, 0x01];
        assert!(ProgramAssembler::assemble(std::iter::empty(), &truncated).is_err());
    }
}
