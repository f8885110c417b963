/// Tables for processes, their movements and the tracking list.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS processos (
    numero_processo TEXT PRIMARY KEY,
    tribunal TEXT,
    classe_codigo INTEGER,
    classe_nome TEXT,
    sistema_codigo INTEGER,
    sistema_nome TEXT,
    data_hora_ultima_atualizacao TEXT,
    extra TEXT NOT NULL DEFAULT '{}',
    fetched_at TEXT
);

CREATE INDEX IF NOT EXISTS ix_proc_tribunal ON processos(tribunal);

-- Replaced wholesale on every fetch of the owning process
CREATE TABLE IF NOT EXISTS movimentos (
    numero_processo TEXT NOT NULL,
    mov_codigo INTEGER,
    mov_nome TEXT,
    mov_data_hora TEXT,
    mov_orgao_codigo TEXT,
    mov_orgao_nome TEXT
);

CREATE INDEX IF NOT EXISTS ix_mov_numero ON movimentos(numero_processo, mov_data_hora);

CREATE TABLE IF NOT EXISTS processos_lista (
    numero_processo TEXT PRIMARY KEY,
    tribunal_inicial TEXT,
    categoria TEXT,
    primeira_inclusao TEXT NOT NULL,
    ultimo_update TEXT
);
"#;
