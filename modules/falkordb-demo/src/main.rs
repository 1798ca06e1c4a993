use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use falkordb_client::{query, ConnectionConfig, Session};

const CREATE_USERS_AND_ROLES: &str = "
    CREATE
    (userNode:UserType {name: 'User'}),
    (john:User {name: 'John Doe'}),
    (jane:User {name: 'Jane Doe'}),
    (dwight:User {name: 'Dwight Schrute'}),

    (roleNode:RoleType {name: 'Role'}),
    (admin:Role {name: 'Administrator'}),
    (dev:Role {name: 'Developer'}),
    (qa:Role {name: 'QA Engineer'}),
    (pm:Role {name: 'Project Manager'}),
    (arch:Role {name: 'Solutions Architect'}),

    (admin)-[:IS_ROLE]->(roleNode),
    (dev)-[:IS_ROLE]->(roleNode),
    (qa)-[:IS_ROLE]->(roleNode),
    (pm)-[:IS_ROLE]->(roleNode),
    (arch)-[:IS_ROLE]->(roleNode),

    (john)-[:IS_USER]->(userNode),
    (jane)-[:IS_USER]->(userNode),
    (dwight)-[:IS_USER]->(userNode),

    (john)-[:HAS_ROLE]->(dev),
    (jane)-[:HAS_ROLE]->(qa),
    (dwight)-[:HAS_ROLE]->(admin),
    (dwight)-[:HAS_ROLE]->(arch)
    RETURN john, jane, dwight
";

const USERS_WITH_ROLES: &str = "
    MATCH (u:User)-[r:HAS_ROLE]->(role:Role)
    RETURN u.name AS User, collect(role.name) AS Roles
";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("falkordb=info".parse()?))
        .init();

    let config = ConnectionConfig::from_env()?;
    config.log_redacted();
    let graph_name = std::env::var("FALKORDB_GRAPH").unwrap_or_else(|_| "social".to_string());

    let session = Session::open(config).await?;
    let graph = session.select_graph(&graph_name);

    let cleared = graph.query(query("MATCH (n) DETACH DELETE n")).await?;
    info!(
        graph = %graph_name,
        nodes_deleted = cleared.stats().nodes_deleted(),
        "Cleared existing data"
    );

    let mut created = graph.query(query(CREATE_USERS_AND_ROLES)).await?;
    info!(
        nodes_created = created.stats().nodes_created(),
        relationships_created = created.stats().relationships_created(),
        "Seeded users and roles"
    );
    if created.next() {
        let record = created.record()?;
        for i in 0..record.len() {
            let user = record.get_by_index(i)?.as_node()?;
            let name = user.get_property("name").map(ToString::to_string).unwrap_or_default();
            println!("Created user: {name}");
        }
    }

    let users = graph.query(query(USERS_WITH_ROLES)).await?;
    println!("\nUsers and their roles:");
    users.pretty_print();

    session.close().await;
    Ok(())
}
