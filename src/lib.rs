/*!
# Faculty Portal: Dynamic Attributes

Back end for the faculty portal that tracks student projects and internships.
Faculty can attach their own typed columns ("Status", "Marks", "Final Report")
to either family of records without touching the base schema, edit the values
inline in a spreadsheet-like table, and move everything in and out of Excel.

## Architecture

### Storage boundary
- **Backend** - async table operations (select/insert/update/delete), an
  atomic upsert, and file uploads returning public URLs
- **MemoryBackend** - in-process tables, optionally written through to a
  gzip snapshot
- **RestBackend** - hosted PostgREST-style database with object storage

### Attribute core (implemented once, parameterised by `EntityFamily`)
- **Column Registry** - column definitions per family
- **Value Store** - one value per (entity, column) pair
- **Entity Store** - base project/internship records
- **Attribute Resolver** - joins columns and values, mediates writes and
  cascade deletes

### Presentation state
- **Cell Editor** - `Viewing -> Editing -> Saving` per cell, widget choice per type
- **Row Editor** - one base field open at a time per row

### Import/Export
- **loader** - parse xlsx/xls/ods and CSV uploads into sheets
- **downloader** - write sheets as xlsx or CSV
- **bridge** - map sheet rows to entities plus dynamic columns and back

## REST API Endpoints (`web` feature)

- `GET|POST /api/{family}/columns`, `DELETE /api/{family}/columns/{id}`
- `GET|POST /api/{family}/entities`, `PATCH|DELETE /api/{family}/entities/{id}`
- `GET /api/{family}/entities/{id}/attributes`
- `PUT /api/{family}/entities/{id}/attributes/{column_id}`
- `POST /api/{family}/entities/{id}/attributes/{column_id}/file`
- `POST /api/{family}/import`, `GET /api/{family}/export?format=xlsx|csv`
*/

#[cfg(feature = "web")]
pub mod app;
pub mod bridge;
pub mod cell;
pub mod column;
pub mod config;
pub mod downloader;
pub mod entity;
pub mod error;
pub mod family;
pub mod loader;
pub mod resolver;
pub mod rest;
pub mod saving;
pub mod store;
pub mod value;

/// Re-export the types most callers need
pub use bridge::{ImportReport, RowFailure, Sheet};
pub use cell::{CellEditor, CellError, CellState, CellView, RowEditor, Widget};
pub use column::{Column, ColumnRegistry, ColumnType};
pub use entity::{EntityRecord, EntityStore};
pub use error::{BackendError, PortalError, PortalResult};
pub use family::EntityFamily;
pub use resolver::{AttributeResolver, Portal, ResolvedAttribute};
pub use store::{Backend, Filter, MemoryBackend, Row, StoreHandle};
pub use value::{Value, ValueStore};
