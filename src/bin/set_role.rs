use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use std::io::{self, Write};

use examin_backend::models::AccountRole;

fn prompt(label: &str) -> io::Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut value = String::new();
    io::stdin().read_line(&mut value)?;
    Ok(value.trim().to_string())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("🛡️  Examin - Set account role");
    println!("==========================================");

    dotenv().ok();

    let database_url = std::env::var("DATABASE_URL").map_err(|_| "DATABASE_URL must be set in .env file")?;

    let mut args = std::env::args().skip(1);
    let email = match args.next() {
        Some(email) => email,
        None => prompt("Email address")?,
    };
    let role = match args.next() {
        Some(role) => role,
        None => prompt("Role (user/guide/admin)")?,
    };

    let role: AccountRole = match role.parse() {
        Ok(role) => role,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Ok(());
        }
    };

    if email.is_empty() || !email.contains('@') {
        eprintln!("❌ Invalid email address");
        return Ok(());
    }

    let pool = PgPoolOptions::new().max_connections(1).connect(&database_url).await?;

    // accounts sign up through the identity provider, so only existing profiles can be changed
    let updated: Vec<(uuid::Uuid, String)> = sqlx::query_as(
        "UPDATE accounts SET role = $2, updated_at = NOW() WHERE lower(email) = lower($1) RETURNING id, name",
    )
    .bind(&email)
    .bind(role.as_str())
    .fetch_all(&pool)
    .await?;

    if updated.is_empty() {
        eprintln!("❌ No account with email {} - the user must create a profile first", email);
        return Ok(());
    }

    for (id, name) in updated {
        println!("✅ {} ({}) is now {}", name, id, role);
    }

    Ok(())
}
