pub const SCHEMA: &str = r#"
-- Users authenticate with a password or a session token
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    admin INTEGER NOT NULL DEFAULT 0,
    password_hash TEXT NOT NULL,     -- argon2id hash with embedded salt
    fname TEXT,
    lname TEXT,
    email TEXT,
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

-- Session tokens issued by /api/login
CREATE TABLE IF NOT EXISTS tokens (
    id TEXT PRIMARY KEY,
    token_hash TEXT NOT NULL,          -- argon2id hash with embedded salt
    token_lookup TEXT NOT NULL,        -- first 8 chars of a uuid for fast lookup
    username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
    created_at TEXT NOT NULL,
    expires_at TEXT,                   -- NULL = never
    last_used_at TEXT
);

CREATE TABLE IF NOT EXISTS orgs (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    permissions TEXT NOT NULL DEFAULT '{}',   -- username -> [role]
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

-- Projects: id is org:project
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    org TEXT NOT NULL REFERENCES orgs(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    permissions TEXT NOT NULL DEFAULT '{}',
    visibility TEXT NOT NULL DEFAULT 'private',
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

-- Branches: id is org:project:branch
CREATE TABLE IF NOT EXISTS branches (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL REFERENCES projects(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    source TEXT,                       -- NULL only for master
    tag INTEGER NOT NULL DEFAULT 0,
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

-- Elements: id is org:project:branch:element; parent/source/target are full ids
CREATE TABLE IF NOT EXISTS elements (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    branch TEXT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    name TEXT NOT NULL DEFAULT '',
    type TEXT NOT NULL DEFAULT '',
    documentation TEXT NOT NULL DEFAULT '',
    parent TEXT,
    source TEXT,
    target TEXT,
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

-- Artifacts: metadata for blobs held by an artifact strategy
CREATE TABLE IF NOT EXISTS artifacts (
    id TEXT PRIMARY KEY,
    project TEXT NOT NULL,
    branch TEXT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    name TEXT NOT NULL DEFAULT '',
    location TEXT NOT NULL DEFAULT '',
    filename TEXT NOT NULL,
    strategy TEXT NOT NULL,
    size INTEGER NOT NULL DEFAULT 0,
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

CREATE TABLE IF NOT EXISTS webhooks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    type TEXT NOT NULL,                -- Outgoing | Incoming
    reference TEXT NOT NULL DEFAULT '', -- '' = server scope
    triggers TEXT NOT NULL DEFAULT '[]',
    url TEXT,
    token_hash TEXT,                   -- sha256 hex of the incoming token
    token_location TEXT,
    custom TEXT NOT NULL DEFAULT '{}',

    created_on TEXT NOT NULL,
    updated_on TEXT NOT NULL,
    created_by TEXT,
    last_modified_by TEXT,
    archived INTEGER NOT NULL DEFAULT 0,
    archived_on TEXT,
    archived_by TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_tokens_lookup ON tokens(token_lookup);
CREATE INDEX IF NOT EXISTS idx_tokens_user ON tokens(username);
CREATE INDEX IF NOT EXISTS idx_projects_org ON projects(org);
CREATE INDEX IF NOT EXISTS idx_branches_project ON branches(project);
CREATE INDEX IF NOT EXISTS idx_elements_branch ON elements(branch);
CREATE INDEX IF NOT EXISTS idx_elements_parent ON elements(parent);
CREATE INDEX IF NOT EXISTS idx_elements_source ON elements(source);
CREATE INDEX IF NOT EXISTS idx_elements_target ON elements(target);
CREATE INDEX IF NOT EXISTS idx_artifacts_branch ON artifacts(branch);
CREATE INDEX IF NOT EXISTS idx_webhooks_reference ON webhooks(reference);
"#;
