//! Generated gRPC stubs for the `GitOps/UpdateManifests` bidirectional stream.

#![allow(clippy::missing_errors_doc, clippy::doc_markdown, clippy::similar_names)]

tonic::include_proto!("manifestpromotion");
