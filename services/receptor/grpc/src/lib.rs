//! Tonic StreamReport client, chunked spool transport, and spool reassembly for receptor.
//!
//! A finished multipart spool leaves the process as a client-streaming call:
//! one boundary-declaration unit carrying the stream content type, then the
//! spool bytes in fixed-size units, then close-and-acknowledge.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapter;
pub mod assembler;
pub mod client;
pub mod error;
pub mod memory;
pub mod stream;

pub use adapter::{AdapterState, ChunkedStreamAdapter, TransmitSummary, DEFAULT_CHUNK_SIZE};
pub use assembler::{AssembledSpool, SpoolAssembler};
pub use client::{ClientConfig, ReceptorClient, TlsSettings, STREAM_REPORT_PATH};
pub use error::TransportError;
pub use memory::{FailureMode, MemoryOpener, RecordedStream};
pub use stream::{cancel_pair, CancelHandle, CancelSignal, ReportStream, StreamOpener, TonicOpener};

/// Protobuf messages exchanged with the collector.
///
/// Declared by hand with `prost` derives so the crate builds without `protoc`.
pub mod proto {
    /// Version 1 of the receptor protocol
    #[allow(missing_docs)]
    pub mod receptor_v1 {
        use std::collections::HashMap;

        /// One transport unit of a `StreamReport` call
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct ReportChunk {
            #[prost(bytes = "bytes", tag = "1")]
            pub content: ::prost::bytes::Bytes,
            /// Set only on the first unit, whose content is the stream content type
            #[prost(bool, tag = "2")]
            pub is_boundary: bool,
        }

        /// Reported finding; travels as the first structured part of a bundle
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Finding {
            #[prost(string, tag = "1")]
            pub receptor_type: ::prost::alloc::string::String,
            #[prost(string, tag = "2")]
            pub service_provider_account: ::prost::alloc::string::String,
            #[prost(message, repeated, tag = "3")]
            pub evidences: ::prost::alloc::vec::Vec<Evidence>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Evidence {
            #[prost(string, tag = "1")]
            pub caption: ::prost::alloc::string::String,
            #[prost(string, tag = "2")]
            pub description: ::prost::alloc::string::String,
            #[prost(string, tag = "3")]
            pub service_name: ::prost::alloc::string::String,
            #[prost(string, tag = "4")]
            pub entity_type: ::prost::alloc::string::String,
            /// Document descriptions; bodies travel as their own parts
            #[prost(message, repeated, tag = "5")]
            pub documents: ::prost::alloc::vec::Vec<Document>,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Document {
            #[prost(string, tag = "1")]
            pub file_name: ::prost::alloc::string::String,
            #[prost(string, tag = "2")]
            pub mime: ::prost::alloc::string::String,
            #[prost(map = "string, string", tag = "3")]
            pub metadata: HashMap<::prost::alloc::string::String, ::prost::alloc::string::String>,
            /// Empty once the body has been moved into a part
            #[prost(bytes = "vec", tag = "4")]
            pub body: ::prost::alloc::vec::Vec<u8>,
        }

        /// Raw API exchange an evidence was derived from
        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Source {
            #[prost(string, tag = "1")]
            pub raw_api_request: ::prost::alloc::string::String,
            #[prost(string, tag = "2")]
            pub raw_api_response: ::prost::alloc::string::String,
        }

        #[derive(Clone, PartialEq, ::prost::Message)]
        pub struct Sources {
            #[prost(message, repeated, tag = "1")]
            pub sources: ::prost::alloc::vec::Vec<Source>,
        }
    }
}

pub use proto::receptor_v1::*;
