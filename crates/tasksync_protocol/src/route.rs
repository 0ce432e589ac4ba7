//! The endpoint table of the record store.

use crate::http::Method;

/// An endpoint of the remote record store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `GET /task/{userId}` - canonical task list of a user.
    FetchTasks {
        /// Owning user.
        user_id: String,
    },
    /// `POST /task` - create one task.
    CreateTask,
    /// `PUT /task` - full update of one task.
    UpdateTask,
    /// `PATCH /task/{id}` - partial update.
    PatchTask {
        /// Task id.
        id: String,
    },
    /// `DELETE /task/{id}` - delete by id.
    DeleteTask {
        /// Task id.
        id: String,
    },
    /// `POST /task/sync/{userId}` - bulk reconciliation.
    SyncTasks {
        /// Owning user.
        user_id: String,
    },
    /// `GET /token/csrf-token` - issue an anti-forgery token.
    CsrfToken,
    /// `POST /auth/login` - issue bearer credentials.
    Login,
    /// `POST /auth/signin` - issue bearer credentials.
    Signin,
    /// `GET /generic/ping` - liveness probe.
    Ping,
}

impl Route {
    /// Returns the method of this route.
    pub fn method(&self) -> Method {
        match self {
            Route::FetchTasks { .. } | Route::CsrfToken | Route::Ping => Method::Get,
            Route::CreateTask | Route::SyncTasks { .. } | Route::Login | Route::Signin => {
                Method::Post
            }
            Route::UpdateTask => Method::Put,
            Route::PatchTask { .. } => Method::Patch,
            Route::DeleteTask { .. } => Method::Delete,
        }
    }

    /// Returns the request path of this route.
    pub fn path(&self) -> String {
        match self {
            Route::FetchTasks { user_id } => format!("/task/{user_id}"),
            Route::CreateTask | Route::UpdateTask => "/task".to_string(),
            Route::PatchTask { id } | Route::DeleteTask { id } => format!("/task/{id}"),
            Route::SyncTasks { user_id } => format!("/task/sync/{user_id}"),
            Route::CsrfToken => "/token/csrf-token".to_string(),
            Route::Login => "/auth/login".to_string(),
            Route::Signin => "/auth/signin".to_string(),
            Route::Ping => "/generic/ping".to_string(),
        }
    }

    /// Resolves a method and path (without query) to a route.
    pub fn parse(method: Method, path: &str) -> Option<Route> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let route = match (method, segments.as_slice()) {
            (Method::Get, ["task", user_id]) => Route::FetchTasks {
                user_id: (*user_id).to_string(),
            },
            (Method::Post, ["task"]) => Route::CreateTask,
            (Method::Put, ["task"]) => Route::UpdateTask,
            (Method::Patch, ["task", id]) => Route::PatchTask {
                id: (*id).to_string(),
            },
            (Method::Delete, ["task", id]) => Route::DeleteTask {
                id: (*id).to_string(),
            },
            (Method::Post, ["task", "sync", user_id]) => Route::SyncTasks {
                user_id: (*user_id).to_string(),
            },
            (Method::Get, ["token", "csrf-token"]) => Route::CsrfToken,
            (Method::Post, ["auth", "login"]) => Route::Login,
            (Method::Post, ["auth", "signin"]) => Route::Signin,
            (Method::Get, ["generic", "ping"]) => Route::Ping,
            _ => return None,
        };
        match &route {
            Route::FetchTasks { user_id: v }
            | Route::SyncTasks { user_id: v }
            | Route::PatchTask { id: v }
            | Route::DeleteTask { id: v }
                if v.is_empty() =>
            {
                None
            }
            _ => Some(route),
        }
    }

    /// Returns true if the route requires a bearer credential.
    pub fn requires_auth(&self) -> bool {
        !matches!(
            self,
            Route::CsrfToken | Route::Login | Route::Signin | Route::Ping
        )
    }

    /// Returns true if the route must echo the anti-forgery token.
    pub fn requires_csrf(&self) -> bool {
        self.method().is_mutating() && self.requires_auth()
    }
}
