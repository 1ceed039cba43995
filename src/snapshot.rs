//! Protobuf encoding of interpreter state
//!
//! A stored `VmState`, or a state paused at an asynchronous call, can be
//! written out as bytes and restored later without re-running any chunk.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::executor::AsyncCall;
use crate::state::{CallFrame, Callable, Counters, DeclaredFunction, ThrowFrame, VmState};
use crate::value::Value;

/// Wire messages for VM snapshots
pub mod proto {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ValueProto {
        #[prost(oneof = "value_proto::Kind", tags = "1, 2, 3, 4, 5, 6, 7")]
        pub kind: Option<value_proto::Kind>,
    }

    pub mod value_proto {
        #[derive(Clone, PartialEq, prost::Oneof)]
        pub enum Kind {
            #[prost(bool, tag = "1")]
            Null(bool),
            #[prost(bool, tag = "2")]
            Bool(bool),
            #[prost(int64, tag = "3")]
            Int(i64),
            #[prost(double, tag = "4")]
            Float(f64),
            #[prost(string, tag = "5")]
            Str(String),
            #[prost(message, tag = "6")]
            Array(super::ArrayProto),
            #[prost(message, tag = "7")]
            Object(super::ObjectProto),
        }
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ArrayProto {
        #[prost(message, repeated, tag = "1")]
        pub items: Vec<ValueProto>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ObjectProto {
        #[prost(message, repeated, tag = "1")]
        pub entries: Vec<EntryProto>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct EntryProto {
        #[prost(string, tag = "1")]
        pub key: String,
        #[prost(message, optional, tag = "2")]
        pub value: Option<ValueProto>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CallableProto {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(uint64, tag = "2")]
        pub arg_count: u64,
        #[prost(uint64, tag = "3")]
        pub upvalue_count: u64,
        #[prost(uint64, tag = "4")]
        pub ip: u64,
        #[prost(uint64, tag = "5")]
        pub chunk: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CallFrameProto {
        #[prost(uint64, tag = "1")]
        pub ip: u64,
        #[prost(message, optional, tag = "2")]
        pub closure: Option<CallableProto>,
        #[prost(uint64, tag = "3")]
        pub base: u64,
        #[prost(uint64, tag = "4")]
        pub arg_count: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct ThrowFrameProto {
        #[prost(uint64, tag = "1")]
        pub catch_ip: u64,
        #[prost(uint64, tag = "2")]
        pub stack_len: u64,
        #[prost(uint64, tag = "3")]
        pub call_depth: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct DeclaredFunctionProto {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(uint64, tag = "2")]
        pub arg_count: u64,
        #[prost(uint64, tag = "3")]
        pub ip: u64,
        #[prost(uint64, tag = "4")]
        pub chunk: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct CountersProto {
        #[prost(uint64, tag = "1")]
        pub ops: u64,
        #[prost(uint64, tag = "2")]
        pub async_steps: u64,
        #[prost(uint64, tag = "3")]
        pub max_mem_used: u64,
        #[prost(uint64, tag = "4")]
        pub sync_duration_micros: u64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct VmStateProto {
        #[prost(message, repeated, tag = "1")]
        pub stack: Vec<ValueProto>,
        #[prost(message, repeated, tag = "2")]
        pub frames: Vec<CallFrameProto>,
        #[prost(message, repeated, tag = "3")]
        pub upvalues: Vec<ValueProto>,
        #[prost(message, repeated, tag = "4")]
        pub declared_functions: Vec<DeclaredFunctionProto>,
        #[prost(message, repeated, tag = "5")]
        pub throw_stack: Vec<ThrowFrameProto>,
        #[prost(message, optional, tag = "6")]
        pub counters: Option<CountersProto>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct SuspensionProto {
        #[prost(message, optional, tag = "1")]
        pub state: Option<VmStateProto>,
        #[prost(string, tag = "2")]
        pub capability: String,
        #[prost(message, repeated, tag = "3")]
        pub args: Vec<ValueProto>,
    }
}

/// A run paused at an asynchronous capability call
///
/// Resuming means pushing the call's result onto `state.stack` and executing
/// again from the top frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Suspension {
    pub state: VmState,
    pub call: AsyncCall,
}

impl Suspension {
    /// State to execute next, with the call's result in place
    pub fn resume_with(self, result: Value) -> VmState {
        let mut state = self.state;
        state.stack.push(result);
        state
    }

    pub fn to_proto_bytes(&self) -> Vec<u8> {
        use prost::Message;

        proto::SuspensionProto {
            state: Some(self.state.to_proto()),
            capability: self.call.name.clone(),
            args: self.call.args.iter().map(value_to_proto).collect(),
        }
        .encode_to_vec()
    }

    pub fn from_proto_bytes(bytes: &[u8]) -> Result<Self, String> {
        use prost::Message;

        let proto = proto::SuspensionProto::decode(bytes)
            .map_err(|e| format!("Failed to decode protobuf: {}", e))?;
        let state = VmState::from_proto(proto.state.ok_or("Suspension has no state")?)?;
        let args = proto
            .args
            .into_iter()
            .map(value_from_proto)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Suspension {
            state,
            call: AsyncCall {
                name: proto.capability,
                args,
            },
        })
    }
}

impl VmState {
    /// Serialize this state to protobuf bytes
    pub fn to_proto_bytes(&self) -> Vec<u8> {
        use prost::Message;

        self.to_proto().encode_to_vec()
    }

    /// Deserialize a state from protobuf bytes
    pub fn from_proto_bytes(bytes: &[u8]) -> Result<Self, String> {
        use prost::Message;

        let proto = proto::VmStateProto::decode(bytes)
            .map_err(|e| format!("Failed to decode protobuf: {}", e))?;
        Self::from_proto(proto)
    }

    pub fn to_proto(&self) -> proto::VmStateProto {
        proto::VmStateProto {
            stack: self.stack.iter().map(value_to_proto).collect(),
            frames: self.frames.iter().map(frame_to_proto).collect(),
            upvalues: self.upvalues.iter().map(value_to_proto).collect(),
            declared_functions: self
                .declared_functions
                .iter()
                .map(|(name, function)| proto::DeclaredFunctionProto {
                    name: name.clone(),
                    arg_count: function.arg_count as u64,
                    ip: function.ip as u64,
                    chunk: function.chunk as u64,
                })
                .collect(),
            throw_stack: self
                .throw_stack
                .iter()
                .map(|handler| proto::ThrowFrameProto {
                    catch_ip: handler.catch_ip as u64,
                    stack_len: handler.stack_len as u64,
                    call_depth: handler.call_depth as u64,
                })
                .collect(),
            counters: Some(proto::CountersProto {
                ops: self.counters.ops,
                async_steps: self.counters.async_steps,
                max_mem_used: self.counters.max_mem_used,
                sync_duration_micros: self.counters.sync_duration.as_micros() as u64,
            }),
        }
    }

    pub fn from_proto(proto: proto::VmStateProto) -> Result<Self, String> {
        let counters = proto.counters.unwrap_or_default();

        Ok(VmState {
            stack: proto
                .stack
                .into_iter()
                .map(value_from_proto)
                .collect::<Result<_, _>>()?,
            frames: proto
                .frames
                .into_iter()
                .map(frame_from_proto)
                .collect::<Result<_, _>>()?,
            upvalues: proto
                .upvalues
                .into_iter()
                .map(value_from_proto)
                .collect::<Result<_, _>>()?,
            declared_functions: proto
                .declared_functions
                .into_iter()
                .map(|f| {
                    (
                        f.name,
                        DeclaredFunction {
                            arg_count: f.arg_count as usize,
                            ip: f.ip as usize,
                            chunk: f.chunk as usize,
                        },
                    )
                })
                .collect(),
            throw_stack: proto
                .throw_stack
                .into_iter()
                .map(|t| ThrowFrame {
                    catch_ip: t.catch_ip as usize,
                    stack_len: t.stack_len as usize,
                    call_depth: t.call_depth as usize,
                })
                .collect(),
            counters: Counters {
                ops: counters.ops,
                async_steps: counters.async_steps,
                max_mem_used: counters.max_mem_used,
                sync_duration: Duration::from_micros(counters.sync_duration_micros),
            },
        })
    }
}

fn frame_to_proto(frame: &CallFrame) -> proto::CallFrameProto {
    let closure = &frame.closure;
    proto::CallFrameProto {
        ip: frame.ip as u64,
        closure: Some(proto::CallableProto {
            name: closure.name.clone(),
            arg_count: closure.arg_count as u64,
            upvalue_count: closure.upvalue_count as u64,
            ip: closure.ip as u64,
            chunk: closure.chunk as u64,
        }),
        base: frame.base as u64,
        arg_count: frame.arg_count as u64,
    }
}

fn frame_from_proto(proto: proto::CallFrameProto) -> Result<CallFrame, String> {
    let closure = proto.closure.ok_or("Call frame has no closure")?;
    Ok(CallFrame {
        ip: proto.ip as usize,
        closure: Callable {
            name: closure.name,
            arg_count: closure.arg_count as usize,
            upvalue_count: closure.upvalue_count as usize,
            ip: closure.ip as usize,
            chunk: closure.chunk as usize,
        },
        base: proto.base as usize,
        arg_count: proto.arg_count as usize,
    })
}

fn value_to_proto(value: &Value) -> proto::ValueProto {
    use proto::value_proto::Kind;

    let kind = match value {
        Value::Null => Kind::Null(true),
        Value::Bool(b) => Kind::Bool(*b),
        Value::Int(i) => Kind::Int(*i),
        Value::Float(f) => Kind::Float(*f),
        Value::String(s) => Kind::Str(s.clone()),
        Value::Array(items) => Kind::Array(proto::ArrayProto {
            items: items.iter().map(value_to_proto).collect(),
        }),
        Value::Object(map) => Kind::Object(proto::ObjectProto {
            entries: map
                .iter()
                .map(|(key, value)| proto::EntryProto {
                    key: key.clone(),
                    value: Some(value_to_proto(value)),
                })
                .collect(),
        }),
    };
    proto::ValueProto { kind: Some(kind) }
}

fn value_from_proto(proto: proto::ValueProto) -> Result<Value, String> {
    use proto::value_proto::Kind;

    Ok(match proto.kind.ok_or("Value has no kind")? {
        Kind::Null(_) => Value::Null,
        Kind::Bool(b) => Value::Bool(b),
        Kind::Int(i) => Value::Int(i),
        Kind::Float(f) => Value::Float(f),
        Kind::Str(s) => Value::String(s),
        Kind::Array(array) => Value::Array(
            array
                .items
                .into_iter()
                .map(value_from_proto)
                .collect::<Result<_, _>>()?,
        ),
        Kind::Object(object) => {
            let mut map = BTreeMap::new();
            for entry in object.entries {
                let value = entry.value.ok_or("Object entry has no value")?;
                map.insert(entry.key, value_from_proto(value)?);
            }
            Value::Object(map)
        }
    })
}
