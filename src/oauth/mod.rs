//! OAuth 2.0 identities, client registry, grants, tokens and the authorization server.

pub mod application;
pub mod auth_server;
pub mod grant;
pub mod identity;
pub mod revocation;
pub mod token;
pub mod types;


// Re-export frequently used items from each module
pub use crate::storage::{
    inmemory::MemoryOAuthStorage,
    traits::{
        AccessTokenStore, ApplicationStore, GrantStore, OAuthStorage, RefreshTokenStore, UserStore,
    },
};
pub use application::{
    AllowAllApplications, Application, ApplicationPolicy, ApplicationUpdate, ClientRegistry,
    NewApplication, UsageContext,
};
pub use auth_server::{
    AuthorizationRequest, AuthorizationResponse, AuthorizationServer, ClientAuthentication,
    ImplicitResponse, TokenForm, TokenLifetimes, TokenRequest, TokenResponse,
};
pub use grant::{Grant, redirect_uri_allowed};
pub use identity::{
    AnonymousUser, HmacPasswordHasher, PasswordHasher, PasswordManager, SuperUser, User,
    UserDirectory, UserIdentity,
};
pub use revocation::RevocationCoordinator;
pub use token::{AccessToken, RefreshToken, TokenIssuer, TokenPair};
pub use types::{
    AuthorizationGrantType, ClientType, Clock, GrantType, ManualClock, RandomTokenGenerator,
    SystemClock, TokenGenerator, TokenType, generate_token,
};
