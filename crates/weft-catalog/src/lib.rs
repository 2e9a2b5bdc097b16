//! Catalog store for the Weft workflow planner.
//!
//! Three independent catalogs feed the planner:
//!
//! - **Replicas**: where a logical file physically lives, per site.
//! - **Transformations**: how an executable is invoked on a site, optionally
//!   inside a [`Container`].
//! - **Sites**: scratch and storage directories plus profile overrides.
//!
//! Catalogs are populated through a mutable [`CatalogBuilder`] and then
//! frozen with [`CatalogBuilder::finalize`], which validates every
//! cross-reference at once and returns an immutable [`Catalog`].
//!
//! ```text
//! CatalogBuilder ──finalize()──▶ Catalog (read-only, Arc-shared)
//!   add_replica                    sites[]        + name index
//!   add_transformation             containers[]   + name index
//!   add_site                       transformations[] → site/container indices
//!   add_container                  replicas by lfn
//! ```

pub mod error;
pub mod file;
pub mod profile;
pub mod replica;
pub mod site;
pub mod store;
pub mod transformation;

pub use error::{CatalogError, CatalogViolation, Result};
pub use file::LogicalFile;
pub use profile::{Namespace, Profiles};
pub use replica::ReplicaEntry;
pub use site::{
    Arch, DEFAULT_POOL_SITE, Directory, DirectoryKind, FileServer, LOCAL_SITE, Operation,
    OsType, Site,
};
pub use store::{
    Catalog, CatalogBuilder, ContainerIndex, SiteIndex, TransformationIndex, TransformationRef,
};
pub use transformation::{Container, ContainerKind, Transformation};
