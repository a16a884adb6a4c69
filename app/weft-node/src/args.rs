//! Command-line surface

use clap::Parser;
use weft_core::BootstrapParams;

/// Weft mesh service node
#[derive(Parser, Debug, Clone)]
#[command(name = "weft-node", version, about)]
pub struct NodeArgs {
    /// Service name
    #[arg(long, default_value = "")]
    pub name: String,

    /// Service namespace
    #[arg(long = "ns", default_value = "weft")]
    pub namespace: String,

    /// Data directory for certificates and local stores
    #[arg(long, default_value = ".")]
    pub dir: String,

    /// Advertised IP address
    #[arg(long, default_value = "")]
    pub ip: String,

    /// Advertised DNS domain
    #[arg(long, default_value = "")]
    pub domain: String,

    /// gRPC listen address; port 0 lets the kernel choose
    #[arg(long, default_value = "0.0.0.0:0")]
    pub grpc: String,

    /// HTTP listen address; port 0 lets the kernel choose
    #[arg(long, default_value = "0.0.0.0:0")]
    pub http: String,

    /// Registry gRPC address
    #[arg(long = "reg", default_value = "")]
    pub registry: String,

    /// Use mutual TLS towards the registry and token stores
    #[arg(long = "reg-secure")]
    pub registry_secure: bool,

    /// Authority gRPC address
    #[arg(long = "a-grpc", default_value = "")]
    pub authority_grpc: String,

    /// Path to the authority certificate (PEM)
    #[arg(long = "a-cert", default_value = "")]
    pub authority_cert: String,

    /// Authority credentials as a key:secret pair
    #[arg(long = "a-cred", default_value = "")]
    pub authority_credentials: String,

    /// Explicit certificate file, overriding the derived name
    #[arg(long = "cert", default_value = "")]
    pub cert_file: String,

    /// Explicit key file, overriding the derived name
    #[arg(long = "key", default_value = "")]
    pub key_file: String,

    /// Shared secret accepted in the Gateway authorization framing
    #[arg(long = "gateway-secret", default_value = "")]
    pub gateway_secret: String,
}

impl From<NodeArgs> for BootstrapParams {
    fn from(args: NodeArgs) -> Self {
        BootstrapParams {
            name: args.name,
            namespace: args.namespace,
            dir: args.dir,
            domain: args.domain,
            ip: args.ip,
            grpc: args.grpc,
            http: args.http,
            registry: args.registry,
            registry_secure: args.registry_secure,
            authority_grpc: args.authority_grpc,
            authority_cert: args.authority_cert,
            authority_credentials: args.authority_credentials,
            cert_file: args.cert_file,
            key_file: args.key_file,
            gateway_secret: args.gateway_secret,
        }
    }
}
