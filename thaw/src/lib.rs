//! Heap snapshot deserialization.
//!
//! A _snapshot_ is an object graph that was flattened into a compact
//! byte stream ahead of time, so that a heap can be restored without
//! re-running the code that originally built it.
//! This crate reads such a stream and materializes the graph
//! directly into the spaces of an [`Isolate`]'s heap.
//!
//! The work is split over a handful of modules:
//!
//!  - [`snapshot`] contains the wire format:
//!    the opcode enumeration, the byte source, and the byte sink.
//!  - [`heap`] contains the heap the graph is restored into.
//!  - [`object`] describes object kinds, their layouts,
//!    and how references are tagged in memory.
//!  - [`deserializer`] contains the decoding state machine.
//!
//! # Example
//!
//! ```
//! use thaw::{
//!     config::Flags,
//!     deserializer::{Deserializer, DeserializerOptions},
//!     heap::Space,
//!     isolate::Isolate,
//!     object::{ObjectKind, Reference, layout::fixed_array},
//!     snapshot::{Opcode, Reservations, SnapshotSink},
//! };
//!
//! let mut sink = SnapshotSink::new();
//! sink.put_opcode(&Opcode::NewObject{space: Space::Old, size_in_words: 3});
//! sink.put_header(ObjectKind::FixedArray);
//! sink.put_smi(1);
//! sink.put_opcode(&Opcode::ClearedWeakReference);
//! sink.put_opcode(&Opcode::Synchronize);
//!
//! let reservations = Reservations::new().with_chunk(Space::Old, 24);
//! let mut isolate = Isolate::new(Flags::default());
//! let data = sink.into_bytes();
//!
//! let mut deserializer = Deserializer::new(
//!     &mut isolate, &data, &reservations, DeserializerOptions::default(),
//! ).unwrap();
//! let Reference::Strong(array) = deserializer.read_root().unwrap()
//!     else { panic!("expected a strong reference") };
//! deserializer.synchronize().unwrap();
//! deserializer.finish().unwrap();
//!
//! let element = isolate.heap
//!     .read_reference(array.field(fixed_array::ELEMENTS)).unwrap();
//! assert_eq!(element, Some(Reference::ClearedWeak));
//! ```

#![warn(missing_docs)]

pub use self::error::*;

pub mod config;
pub mod deserializer;
pub mod external;
pub mod heap;
pub mod isolate;
pub mod object;
pub mod snapshot;

mod error;
