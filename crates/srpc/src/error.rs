// SPDX-License-Identifier: BUSL-1.1
// Copyright 2025 Alfred Jean LLC

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unified error codes shared across the gRPC transport and any other
/// binding this crate grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    NoSuchSession,
    AlreadyCanceled,
    InvalidConfig,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoSuchSession => "NO_SUCH_SESSION",
            Self::AlreadyCanceled => "ALREADY_CANCELED",
            Self::InvalidConfig => "INVALID_CONFIG",
            Self::Internal => "INTERNAL",
        }
    }

    /// Convert this error code into a [`tonic::Status`] with the given message.
    pub fn to_grpc_status(&self, message: impl Into<String>) -> tonic::Status {
        let code = match self {
            Self::NoSuchSession => tonic::Code::NotFound,
            Self::AlreadyCanceled => tonic::Code::FailedPrecondition,
            Self::InvalidConfig => tonic::Code::InvalidArgument,
            Self::Internal => tonic::Code::Internal,
        };
        tonic::Status::new(code, message)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Crate-level error, carrying an [`ErrorCode`] so transports can map it
/// onto their own status type without re-deriving the classification.
#[derive(Debug, Clone)]
pub struct SrpcError {
    pub code: ErrorCode,
    pub message: String,
}

impl SrpcError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn to_grpc_status(&self) -> tonic::Status {
        self.code.to_grpc_status(self.message.clone())
    }
}

impl fmt::Display for SrpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for SrpcError {}
