mod client;
mod source;

pub use client::{
    ApiErrorClass, ComponentContent, Credentials, DEFAULT_ENDPOINT, FolderDraft, Item,
    ItemComponent, ItemRef, ItemType, PimClient, PimError, ProductContent, ProductDraft,
    ProductUpdate,
};
pub use source::{
    FileSource, HttpSource, RankedSources, RecordPayload, RecordSource, SourceError, SourceRecord,
};

pub use reqwest::StatusCode;
