//! devctl: device control HTTP server with off-thread request dispatch.

pub mod dispatch;
pub mod endpoints;
mod error;
mod health;
pub mod http_client;
mod request;
pub mod routing;
pub mod transport;
mod version;
pub mod wifi;

pub use dispatch::{
    Accepted, DispatchConfig, DispatchError, DispatchStats, Dispatcher, ExtendRequest,
    ExtendedRequest, WorkerContext,
};
pub use endpoints::{DispatchPolicy, WebContext, device_routes};
pub use error::{ApiError, ErrorBody};
pub use health::{HealthFields, HealthReporter, TIME_FORMAT};
pub use http_client::{HttpClient, PostOutcome};
pub use request::{DeviceRequest, RequestId};
pub use routing::{EndpointHandler, EndpointResult, HttpMethod, RouteError, RouteTable};
pub use transport::http::{DeferredHttpRequest, PendingRequest};
pub use transport::{AppState, ServerConfig, serve};
pub use version::{DEVCTL_VERSION, VersionInfo};
pub use wifi::{FileWifiManager, NetworkConfig, StoreError, WifiCredentials, WifiManager};
